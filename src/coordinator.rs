//! The per-session handshake state machine.
//!
//! A [`HandshakeCoordinator`] is sans-IO. The caller hands it datagrams
//! ([`on_datagram`](HandshakeCoordinator::on_datagram)) and timer ticks
//! ([`on_timer`](HandshakeCoordinator::on_timer)) and drains what it
//! produces with [`poll_output`](HandshakeCoordinator::poll_output).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::{Buf, BufferPool};
use crate::cookie::{Cookie, CookieStore};
use crate::early::{EarlyDataBuffer, EarlyDataRecord};
use crate::error::{Failure, FailureKind};
use crate::flight::{Flight, FlightBuilder};
use crate::message::{
    parse_datagram, Alert, ClientHello, ContentType, Handshake, HelloVerifyRequest, Message,
    MessageType, Record, EPOCH_APPLICATION, EPOCH_EARLY_DATA, EPOCH_HANDSHAKE, EPOCH_INITIAL,
};
use crate::queue::{HandshakeQueue, Insert, QueueTx};
use crate::record_layer::{RecordError, RecordLayer};
use crate::state::Role;
use crate::timer::{Poll, Timer};
use crate::window::{ReplayWindow, Verdict};
use crate::{Config, Error, Output, State};

/// Alert description for a record layer that asked for an impossible transition.
const INTERNAL_ERROR: u8 = 80;

const DISTANT_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Connected,
    Closed,
}

/// Everything tied to one handshake attempt with one peer.
#[derive(Debug)]
struct Session {
    peer: Option<SocketAddr>,
    state: State,
    /// Client side: the cookie the server handed us.
    cookie: Option<Cookie>,
    timer: Timer,
    flight: Option<Flight>,
    retransmits: usize,
    /// Allocated once the peer has proven its address.
    early_window: Option<ReplayWindow>,
    early: Option<EarlyDataBuffer>,
    app_window: Option<ReplayWindow>,
    last_progress: Option<Instant>,
}

impl Session {
    fn new(peer: Option<SocketAddr>, config: &Config) -> Self {
        Session {
            peer,
            state: State::Idle,
            cookie: None,
            timer: Timer::new(config.max_timeout()),
            flight: None,
            retransmits: 0,
            early_window: None,
            early: None,
            app_window: None,
            last_progress: None,
        }
    }
}

/// Drives one DTLS session through cookie exchange, flight retransmission
/// and 0-RTT.
///
/// Server sessions start unbound and answer ClientHellos without a cookie
/// statelessly. The first ClientHello echoing a valid cookie binds the
/// session to that peer. Only then are replay windows and the early data
/// buffer allocated.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Instant;
/// # use dtls_flight::*;
/// let config = Arc::new(Config::default());
/// let cookies = Arc::new(CookieStore::new(&config, Instant::now()));
/// let mut server = HandshakeCoordinator::accept(config, cookies, NullRecordLayer::server());
///
/// let mut buf = vec![0; 2048];
/// # let (datagram, from) = (vec![], "127.0.0.1:1".parse().unwrap());
/// server.on_datagram(&datagram, from, Instant::now()).ok();
/// loop {
///     match server.poll_output(&mut buf) {
///         Output::Packet(to, data) => { /* send data to `to` */ }
///         Output::Timeout(_) => break,
///         _ => {}
///     }
/// }
/// ```
pub struct HandshakeCoordinator<R> {
    config: Arc<Config>,
    role: Role,
    cookies: Option<Arc<CookieStore>>,
    record_layer: R,
    session: Session,

    /// Inbound handshake messages awaiting a complete flight.
    queue_rx: HandshakeQueue,
    queue_tx: QueueTx,
    buffers: BufferPool,

    /// Next record sequence number per epoch.
    send_seq: [u64; 4],
    /// Next outbound handshake message_seq.
    message_seq: u16,

    /// Client: ClientHello payload from the record layer, resent with the cookie.
    client_hello: Option<Buf>,
    /// Client: state entered once the cookie exchange is done.
    after_cookie: State,
    /// Client: early data written before the cookie exchange finished.
    early_pending: VecDeque<Buf>,
    early_pending_bytes: usize,

    /// Server: early data released when leaving `AcceptingEarlyData`.
    early_released: VecDeque<EarlyDataRecord>,
    app_rx: VecDeque<Buf>,
    events: VecDeque<Event>,

    failure: Option<Failure>,
    last_now: Option<Instant>,
}

impl<R: RecordLayer> HandshakeCoordinator<R> {
    /// Server entry point. The session starts in `Idle`, bound to no peer.
    pub fn accept(config: Arc<Config>, cookies: Arc<CookieStore>, record_layer: R) -> Self {
        Self::new(config, Role::Server, None, Some(cookies), record_layer)
    }

    /// Client entry point. Call [`start`](Self::start) to send the first ClientHello.
    pub fn connect(config: Arc<Config>, peer: SocketAddr, record_layer: R) -> Self {
        Self::new(config, Role::Client, Some(peer), None, record_layer)
    }

    fn new(
        config: Arc<Config>,
        role: Role,
        peer: Option<SocketAddr>,
        cookies: Option<Arc<CookieStore>>,
        record_layer: R,
    ) -> Self {
        let session = Session::new(peer, &config);
        let queue_rx = HandshakeQueue::new(config.max_queue_rx());

        HandshakeCoordinator {
            role,
            cookies,
            record_layer,
            session,
            queue_rx,
            queue_tx: QueueTx::new(),
            buffers: BufferPool::default(),
            send_seq: [0; 4],
            message_seq: 0,
            client_hello: None,
            after_cookie: State::CompletingHandshake,
            early_pending: VecDeque::new(),
            early_pending_bytes: 0,
            early_released: VecDeque::new(),
            app_rx: VecDeque::new(),
            events: VecDeque::new(),
            failure: None,
            last_now: None,
            config,
        }
    }

    pub fn state(&self) -> State {
        self.session.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The bound peer. `None` for a server that has not seen a valid cookie.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.session.peer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Why the session closed, if it closed on a failure.
    pub fn failure(&self) -> Option<Failure> {
        self.failure
    }

    pub fn record_layer(&self) -> &R {
        &self.record_layer
    }

    pub fn has_pending_output(&self) -> bool {
        !self.queue_tx.is_empty() || !self.events.is_empty() || !self.app_rx.is_empty()
    }

    /// Send the first ClientHello.
    pub fn start(&mut self, now: Instant) -> Result<(), Error> {
        self.last_now = Some(now);

        if self.role != Role::Client || self.session.state != State::Idle {
            return Err(Error::InvalidState(self.session.state));
        }

        let advance = match self.record_layer.advance_handshake(State::Idle, None) {
            Ok(v) => v,
            Err(RecordError::Fatal { code }) => return self.abort(code),
            Err(e) => {
                debug!("Record layer not ready to start: {}", e);
                return Ok(());
            }
        };

        let Some(flight) = advance.flight else {
            warn!("Record layer produced no ClientHello");
            return self.abort(INTERNAL_ERROR);
        };

        let Some(client_hello) = flight
            .into_iter()
            .find(|m| m.msg_type == MessageType::ClientHello)
        else {
            warn!("Opening flight has no ClientHello");
            return self.abort(INTERNAL_ERROR);
        };

        self.after_cookie = match advance.next {
            Some(State::AcceptingEarlyData) if self.config.early_data_enabled() => {
                State::AcceptingEarlyData
            }
            Some(State::AcceptingEarlyData) => {
                debug!("Early data disabled, not offering 0-RTT");
                State::CompletingHandshake
            }
            _ => State::CompletingHandshake,
        };

        self.send_flight(std::slice::from_ref(&client_hello), now)?;
        self.client_hello = Some(client_hello.body);
        self.session.last_progress = Some(now);
        self.transition(State::AwaitingCookieEcho);

        Ok(())
    }

    /// Feed one datagram received from `peer`.
    ///
    /// Malformed or unexpected input is dropped without a reply. Only
    /// session-fatal conditions surface as errors.
    pub fn on_datagram(&mut self, datagram: &[u8], peer: SocketAddr, now: Instant) -> Result<(), Error> {
        self.last_now = Some(now);

        if self.session.state == State::Closed {
            trace!("Drop datagram on closed session");
            return Ok(());
        }

        let Some(records) = parse_datagram(datagram) else {
            debug!("Drop malformed datagram from {}", peer);
            return Ok(());
        };

        if let Some(bound) = self.session.peer {
            if bound != peer {
                trace!("Drop datagram from {}, session is bound to {}", peer, bound);
                return Ok(());
            }
        }

        let mut resent = false;

        for record in records {
            if self.session.state == State::Closed {
                break;
            }

            match (record.content_type, record.epoch) {
                (ContentType::Handshake, EPOCH_INITIAL | EPOCH_HANDSHAKE) => {
                    self.handle_handshake(&record, peer, now, &mut resent)?
                }
                (ContentType::ApplicationData, EPOCH_EARLY_DATA) => {
                    self.handle_early_data(&record, now)?
                }
                (ContentType::ApplicationData, EPOCH_APPLICATION) => {
                    self.handle_application_data(&record, now)?
                }
                (ContentType::Alert, EPOCH_INITIAL) => self.handle_plaintext_alert(&record)?,
                (ContentType::Alert, EPOCH_APPLICATION) => {
                    self.handle_protected_alert(&record, now)?
                }
                (content_type, epoch) => {
                    trace!("Drop record {:?} epoch {}", content_type, epoch);
                }
            }
        }

        Ok(())
    }

    /// Drive timers. Resends the current flight on expiry, closes the
    /// session at the retransmission ceiling or the idle timeout.
    ///
    /// A no-op once the session is closed.
    pub fn on_timer(&mut self, now: Instant) -> Result<(), Error> {
        self.last_now = Some(now);

        if self.session.state == State::Closed {
            return Ok(());
        }

        if let Some(idle_deadline) = self.idle_deadline() {
            if now >= idle_deadline {
                debug!(
                    "Idle timeout after {:.03}s in {}",
                    self.config.idle_timeout().as_secs_f32(),
                    self.session.state
                );
                return self.fail(Failure::new(FailureKind::IdleTimeout));
            }
        }

        if self.session.timer.poll(now) == Poll::Pending {
            return Ok(());
        }

        if self.session.retransmits >= self.config.max_retransmits() {
            debug!(
                "Giving up after {} retransmissions in {}",
                self.session.retransmits, self.session.state
            );
            return self.fail(Failure::new(FailureKind::RetransmitLimit));
        }

        self.session.retransmits += 1;
        self.resend("flight timeout");
        self.session.timer.backoff(now);
        debug!(
            "Re-arm flight timeout due to resend in {:.03}s",
            self.session.timer.rto().as_secs_f32()
        );

        Ok(())
    }

    /// Next buffered early data record, server side.
    ///
    /// `more_available` turns false once the buffer is empty and the
    /// session has moved past `AcceptingEarlyData`. Read the rest through
    /// [`poll_output`](Self::poll_output) from then on.
    pub fn read_early_data(&mut self) -> (Option<Vec<u8>>, bool) {
        let next = if self.session.state == State::AcceptingEarlyData {
            self.session.early.as_mut().and_then(|e| e.pop())
        } else {
            self.early_released.pop_front()
        };

        let still_accepting = self.role == Role::Server
            && self.config.early_data_enabled()
            && self.session.state <= State::AcceptingEarlyData;

        let buffered = !self.early_released.is_empty()
            || self.session.early.as_ref().is_some_and(|e| !e.is_empty());

        (next.map(|r| r.data.into_vec()), buffered || still_accepting)
    }

    /// Send 0-RTT data, client side.
    ///
    /// Before the cookie exchange completes the data is held back and sent
    /// right after the cookie-bearing ClientHello.
    pub fn write_early_data(&mut self, data: &[u8]) -> Result<(), Error> {
        let state = self.session.state;

        if state == State::Closed {
            return Err(Error::Closed);
        }

        if data.len() > Record::MAX_PLAINTEXT_LEN {
            return Err(Error::RecordTooLarge(data.len()));
        }

        let offered = self.role == Role::Client && self.after_cookie == State::AcceptingEarlyData;

        match state {
            State::AwaitingCookieEcho if offered => {
                let total = self.early_pending_bytes + data.len();
                if total > self.config.early_data_capacity_bytes() {
                    return Err(Error::CapacityExceeded);
                }
                self.early_pending_bytes = total;
                self.early_pending.push_back(Buf::from_slice(data));
                Ok(())
            }
            State::AcceptingEarlyData if offered => self.seal_and_send(EPOCH_EARLY_DATA, data),
            _ => Err(Error::InvalidState(state)),
        }
    }

    /// Send application data.
    ///
    /// Allowed once established. A server may also send a provisional
    /// (0.5-RTT) reply while still accepting early data.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        match (self.role, self.session.state) {
            (_, State::Established) | (Role::Server, State::AcceptingEarlyData) => {
                self.seal_and_send(EPOCH_APPLICATION, data)
            }
            (_, State::Closed) => Err(Error::Closed),
            (_, state) => Err(Error::InvalidState(state)),
        }
    }

    /// Send close_notify and close the session.
    pub fn close(&mut self, now: Instant) -> Result<(), Error> {
        self.last_now = Some(now);

        if self.session.state == State::Closed {
            return Ok(());
        }

        debug!("Closing session in {}", self.session.state);
        self.send_alert(Alert::close_notify());
        self.close_session();

        Ok(())
    }

    /// Next thing for the caller to act on.
    ///
    /// Datagrams go out first, then state events, then received
    /// application data. `Timeout` means nothing is pending before the
    /// returned instant.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        if let Some((to, p)) = self.queue_tx.pop_front() {
            assert!(
                p.len() <= buf.len(),
                "Output buffer too small for packet {} > {}",
                p.len(),
                buf.len()
            );
            let len = p.len();
            buf[..len].copy_from_slice(&p);
            self.buffers.push(p);
            return Output::Packet(to, &buf[..len]);
        }

        if let Some(event) = self.events.pop_front() {
            return match event {
                Event::Connected => Output::Connected,
                Event::Closed => Output::Closed,
            };
        }

        if let Some(data) = self.app_rx.pop_front() {
            assert!(
                data.len() <= buf.len(),
                "Output buffer too small for application data {} > {}",
                data.len(),
                buf.len()
            );
            let len = data.len();
            buf[..len].copy_from_slice(&data);
            self.buffers.push(data);
            return Output::ApplicationData(&buf[..len]);
        }

        Output::Timeout(self.next_timeout())
    }

    pub(crate) fn next_timeout(&self) -> Instant {
        let flight = self.session.timer.deadline();
        let idle = self.idle_deadline();

        match (flight, idle) {
            (Some(f), Some(i)) => f.min(i),
            (Some(f), None) => f,
            (None, Some(i)) => i,
            (None, None) => self.last_now.unwrap_or_else(Instant::now) + DISTANT_FUTURE,
        }
    }

    fn idle_deadline(&self) -> Option<Instant> {
        if self.session.state == State::Closed {
            return None;
        }
        self.session
            .last_progress
            .map(|t| t + self.config.idle_timeout())
    }

    // =====================================================================
    // Inbound
    // =====================================================================

    fn handle_handshake(
        &mut self,
        record: &Record<'_>,
        peer: SocketAddr,
        now: Instant,
        resent: &mut bool,
    ) -> Result<(), Error> {
        let Ok((rest, handshake)) = Handshake::parse(record.fragment) else {
            debug!("Drop malformed handshake record");
            return Ok(());
        };
        if !rest.is_empty() {
            debug!("Drop handshake record with trailing bytes");
            return Ok(());
        }

        // Cookie exchange happens outside the reassembly queue.
        match (self.role, self.session.state, handshake.msg_type) {
            (Role::Server, State::Idle | State::AwaitingCookieEcho, MessageType::ClientHello) => {
                return self.handle_client_hello(record.sequence, &handshake, peer, now);
            }
            (Role::Server, State::Idle | State::AwaitingCookieEcho, _) => {
                trace!("Drop {:?} before cookie exchange", handshake.msg_type);
                return Ok(());
            }
            (Role::Client, State::AwaitingCookieEcho, MessageType::HelloVerifyRequest) => {
                return self.handle_hello_verify(&handshake, now);
            }
            (Role::Client, State::Idle, _) | (Role::Client, _, MessageType::HelloVerifyRequest) => {
                trace!("Drop {:?} in {}", handshake.msg_type, self.session.state);
                return Ok(());
            }
            _ => {}
        }

        match self.queue_rx.insert(&handshake) {
            Insert::Queued => {
                self.touch(now);
                self.process_queue(now)
            }
            Insert::Duplicate => {
                trace!(
                    "Duplicate {:?} seq {} (next {})",
                    handshake.msg_type,
                    handshake.message_seq,
                    self.queue_rx.next_seq()
                );
                // The peer did not see our flight.
                if !*resent && self.session.flight.is_some() {
                    *resent = true;
                    self.resend("dupe triggers resend");
                }
                Ok(())
            }
            Insert::Present => Ok(()),
            Insert::Full => Ok(()),
        }
    }

    fn handle_client_hello(
        &mut self,
        record_seq: u64,
        handshake: &Handshake<'_>,
        peer: SocketAddr,
        now: Instant,
    ) -> Result<(), Error> {
        let Ok((_, client_hello)) = ClientHello::parse(handshake.body) else {
            debug!("Drop malformed ClientHello from {}", peer);
            return Ok(());
        };

        let Some(cookies) = self.cookies.clone() else {
            return Ok(());
        };

        if client_hello.cookie.is_empty() {
            let cookie = cookies.issue(peer, now);
            debug!("Send HelloVerifyRequest to {}", peer);

            let datagram = hello_verify_datagram(cookie, record_seq, handshake.message_seq);
            if self.queue_tx.len() < self.config.max_queue_tx() {
                self.queue_tx.push_back((peer, datagram));
            } else {
                warn!("Transmit queue full, drop HelloVerifyRequest to {}", peer);
            }

            if self.session.state == State::Idle {
                self.transition(State::AwaitingCookieEcho);
            }
            return Ok(());
        }

        if !cookies.validate(peer, &client_hello.cookie, now) {
            debug!("Drop ClientHello with invalid cookie from {}", peer);
            return Ok(());
        }

        debug!("Valid cookie from {}, binding session", peer);
        self.bind(peer, now);

        // Our first flight reuses the peer's message_seq, as after a
        // HelloVerifyRequest both sides restart at the same number.
        self.queue_rx.set_next_seq(handshake.message_seq.wrapping_add(1));
        self.message_seq = handshake.message_seq;
        self.send_seq[EPOCH_INITIAL as usize] = record_seq;

        let inbound = [Message::new(MessageType::ClientHello, client_hello.payload)];
        self.advance(Some(&inbound), now)
    }

    fn bind(&mut self, peer: SocketAddr, now: Instant) {
        let size = self.config.replay_window_size();

        self.session.peer = Some(peer);
        self.session.last_progress = Some(now);
        self.session.app_window = Some(ReplayWindow::new(size));

        if self.config.early_data_enabled() {
            self.session.early_window = Some(ReplayWindow::new(size));
            self.session.early = Some(EarlyDataBuffer::new(
                self.config.early_data_capacity_bytes(),
            ));
        }
    }

    fn handle_hello_verify(&mut self, handshake: &Handshake<'_>, now: Instant) -> Result<(), Error> {
        let Ok((_, hvr)) = HelloVerifyRequest::parse(handshake.body) else {
            debug!("Drop malformed HelloVerifyRequest");
            return Ok(());
        };

        if hvr.cookie.is_empty() {
            debug!("Drop HelloVerifyRequest without cookie");
            return Ok(());
        }

        let Some(payload) = self.client_hello.clone() else {
            return Ok(());
        };

        debug!("Got cookie, resend ClientHello");
        self.session.cookie = Some(hvr.cookie);
        self.touch(now);
        self.queue_rx.set_next_seq(handshake.message_seq.wrapping_add(1));

        self.send_flight(&[Message { msg_type: MessageType::ClientHello, body: payload }], now)?;
        self.transition(self.after_cookie);

        if self.session.state == State::AcceptingEarlyData {
            self.early_pending_bytes = 0;
            while let Some(data) = self.early_pending.pop_front() {
                self.seal_and_send(EPOCH_EARLY_DATA, &data)?;
            }
        } else {
            self.early_pending.clear();
            self.early_pending_bytes = 0;
        }

        Ok(())
    }

    fn process_queue(&mut self, now: Instant) -> Result<(), Error> {
        while let Some(flight) = self.queue_rx.take_flight() {
            match self.session.state {
                State::AcceptingEarlyData | State::CompletingHandshake => {
                    trace!("Peer flight of {} messages", flight.len());
                    self.advance(Some(&flight), now)?;
                }
                state => {
                    debug!("Drop peer flight in {}", state);
                }
            }
        }
        Ok(())
    }

    fn handle_early_data(&mut self, record: &Record<'_>, now: Instant) -> Result<(), Error> {
        if self.role != Role::Server || self.session.state != State::AcceptingEarlyData {
            trace!("Drop early data in {}", self.session.state);
            return Ok(());
        }

        let Some(window) = self.session.early_window.as_ref() else {
            return Ok(());
        };

        match window.check(record.sequence) {
            Verdict::Accepted => {}
            verdict => {
                debug!("Drop early data seq {}: {:?}", record.sequence, verdict);
                return Ok(());
            }
        }

        let Some(plaintext) = self.open(EPOCH_EARLY_DATA, record)? else {
            return Ok(());
        };

        if let Some(window) = self.session.early_window.as_mut() {
            window.ack(record.sequence);
        }
        self.touch(now);

        let early_record = EarlyDataRecord {
            seq: record.sequence,
            data: plaintext,
        };

        if let Some(early) = self.session.early.as_mut() {
            if early.push(early_record).is_err() {
                debug!(
                    "Drop early data seq {}: capacity {} bytes exceeded",
                    record.sequence,
                    early.capacity_bytes()
                );
            }
        }

        Ok(())
    }

    fn handle_application_data(&mut self, record: &Record<'_>, now: Instant) -> Result<(), Error> {
        if self.session.state < State::AcceptingEarlyData {
            trace!("Drop application data in {}", self.session.state);
            return Ok(());
        }

        let Some(plaintext) = self.open_application(record)? else {
            return Ok(());
        };

        self.touch(now);
        self.app_rx.push_back(plaintext);

        Ok(())
    }

    /// Replay check and open for an epoch 3 record. The sequence number is
    /// only marked once the record layer accepts the record.
    fn open_application(&mut self, record: &Record<'_>) -> Result<Option<Buf>, Error> {
        if self.session.app_window.is_none() {
            // Client side: allocated on first use after the cookie exchange.
            self.session.app_window = Some(ReplayWindow::new(self.config.replay_window_size()));
        }

        if let Some(window) = self.session.app_window.as_ref() {
            let verdict = window.check(record.sequence);
            if verdict != Verdict::Accepted {
                debug!(
                    "Drop {:?} seq {}: {:?}",
                    record.content_type, record.sequence, verdict
                );
                return Ok(None);
            }
        }

        let Some(plaintext) = self.open(EPOCH_APPLICATION, record)? else {
            return Ok(None);
        };

        if let Some(window) = self.session.app_window.as_mut() {
            window.ack(record.sequence);
        }

        Ok(Some(plaintext))
    }

    /// Open a protected record. `None` when the record is to be dropped.
    fn open(&mut self, epoch: u16, record: &Record<'_>) -> Result<Option<Buf>, Error> {
        let mut plaintext = self.buffers.pop();

        match self
            .record_layer
            .open(epoch, record.sequence, record.fragment, &mut plaintext)
        {
            Ok(()) => Ok(Some(plaintext)),
            Err(RecordError::Fatal { code }) => {
                self.buffers.push(plaintext);
                self.abort(code).map(|_| None)
            }
            Err(e) => {
                debug!("Drop record epoch {} seq {}: {}", epoch, record.sequence, e);
                self.buffers.push(plaintext);
                Ok(None)
            }
        }
    }

    /// Unprotected alerts only count until the session is established.
    fn handle_plaintext_alert(&mut self, record: &Record<'_>) -> Result<(), Error> {
        if self.session.peer.is_none() {
            return Ok(());
        }

        if self.session.state >= State::Established {
            debug!("Drop unprotected alert in {}", self.session.state);
            return Ok(());
        }

        self.handle_alert(record.fragment)
    }

    fn handle_protected_alert(&mut self, record: &Record<'_>, now: Instant) -> Result<(), Error> {
        if self.session.state < State::AcceptingEarlyData {
            trace!("Drop protected alert in {}", self.session.state);
            return Ok(());
        }

        let Some(plaintext) = self.open_application(record)? else {
            return Ok(());
        };
        self.touch(now);

        let result = self.handle_alert(&plaintext);
        self.buffers.push(plaintext);
        result
    }

    fn handle_alert(&mut self, fragment: &[u8]) -> Result<(), Error> {
        let Ok((_, alert)) = Alert::parse(fragment) else {
            debug!("Drop malformed alert");
            return Ok(());
        };

        if alert.is_close_notify() {
            debug!("Peer sent close_notify");
            self.close_session();
            return Ok(());
        }

        if alert.is_fatal() {
            debug!("Peer sent fatal alert {:?}", alert.description);
            let code = alert.description.as_u8();
            return self.fail(Failure::with_code(FailureKind::Handshake, code));
        }

        trace!("Ignore warning alert {:?}", alert.description);
        Ok(())
    }

    // =====================================================================
    // Progress
    // =====================================================================

    fn advance(&mut self, inbound: Option<&[Message]>, now: Instant) -> Result<(), Error> {
        let current = self.session.state;

        let advance = match self.record_layer.advance_handshake(current, inbound) {
            Ok(v) => v,
            Err(RecordError::Fatal { code }) => return self.abort(code),
            Err(e) => {
                debug!("Record layer did not advance in {}: {}", current, e);
                return Ok(());
            }
        };

        let mut next = advance.next.unwrap_or(current);

        if next == State::AcceptingEarlyData
            && self.role == Role::Server
            && !self.config.early_data_enabled()
        {
            debug!("Early data disabled, skipping AcceptingEarlyData");
            next = State::CompletingHandshake;
        }

        if !current.can_advance_to(next) || next == State::Idle {
            warn!("Record layer asked for {} -> {}", current, next);
            return self.abort(INTERNAL_ERROR);
        }

        if let Some(data) = advance.application_data {
            self.app_rx.push_back(data);
        }

        match advance.flight {
            Some(flight) => self.send_flight(&flight, now)?,
            None if next == State::Established => {
                // Our last flight was acknowledged by the peer's.
                self.clear_flight();
            }
            None => {}
        }

        if next == State::Established {
            // Keep the final flight around for resends triggered by
            // duplicates, but stop the timer.
            self.session.timer.cancel();
        }

        self.transition(next);
        Ok(())
    }

    fn transition(&mut self, next: State) {
        let current = self.session.state;
        if current == next {
            return;
        }

        debug!("{} -> {}", current, next);
        self.session.state = next;

        if current == State::AcceptingEarlyData {
            if let Some(mut early) = self.session.early.take() {
                self.early_released.extend(early.drain());
            }
            self.session.early_window = None;
        }

        match next {
            State::Established => self.events.push_back(Event::Connected),
            State::Closed => self.events.push_back(Event::Closed),
            _ => {}
        }
    }

    fn touch(&mut self, now: Instant) {
        self.session.last_progress = Some(now);
    }

    // =====================================================================
    // Outbound
    // =====================================================================

    /// Encode `messages` as our new flight, replacing the previous one.
    ///
    /// The flight is committed even if the transmit queue has no room for it
    /// now. The next timer expiry resends it whole.
    fn send_flight(&mut self, messages: &[Message], now: Instant) -> Result<(), Error> {
        let mut builder = FlightBuilder::new(self.config.mtu());
        let mut fragment = Buf::new();
        let mut body = Buf::new();

        for message in messages {
            body.clear();
            let body_bytes: &[u8] = if message.msg_type == MessageType::ClientHello {
                let cookie = self.session.cookie.clone().unwrap_or_default();
                ClientHello::new(cookie, &message.body).serialize(&mut body);
                &body
            } else {
                &message.body
            };

            if Handshake::HEADER_LEN + body_bytes.len() > Record::MAX_FRAGMENT_LEN {
                warn!(
                    "Handshake message {:?} too large ({} bytes)",
                    message.msg_type,
                    body_bytes.len()
                );
                return self.abort(INTERNAL_ERROR);
            }

            fragment.clear();
            Handshake {
                msg_type: message.msg_type,
                message_seq: self.message_seq,
                body: body_bytes,
            }
            .serialize(&mut fragment);
            self.message_seq = self.message_seq.wrapping_add(1);

            let epoch = message.msg_type.epoch();
            let seq = self.next_send_seq(epoch);
            builder.push_record(ContentType::Handshake, epoch, seq, &fragment);
        }

        let flight = builder.finish();
        self.clear_flight();

        if flight.is_empty() {
            trace!("Empty flight in {}", self.session.state);
            return Ok(());
        }
        debug!("Send flight {:?} in {}", flight, self.session.state);

        self.session.flight = Some(flight);
        self.session.retransmits = 0;
        self.session.timer.start(now, self.config.initial_timeout());

        self.enqueue_flight();
        Ok(())
    }

    fn resend(&mut self, reason: &str) {
        debug!("Resending flight due to {}", reason);
        self.enqueue_flight();
    }

    fn enqueue_flight(&mut self) {
        let (Some(flight), Some(peer)) = (self.session.flight.as_ref(), self.session.peer) else {
            return;
        };

        if self.queue_tx.len() + flight.len() > self.config.max_queue_tx() {
            warn!(
                "Transmit queue full (max {}), skip sending flight: {:?}",
                self.config.max_queue_tx(),
                self.queue_tx
            );
            return;
        }

        for datagram in flight.datagrams() {
            let mut buf = self.buffers.pop();
            buf.extend_from_slice(datagram);
            self.queue_tx.push_back((peer, buf));
        }
    }

    fn clear_flight(&mut self) {
        self.session.flight = None;
        self.session.timer.cancel();
    }

    fn seal_and_send(&mut self, epoch: u16, plaintext: &[u8]) -> Result<(), Error> {
        let Some(peer) = self.session.peer else {
            return Err(Error::InvalidState(self.session.state));
        };

        if plaintext.len() > Record::MAX_PLAINTEXT_LEN {
            return Err(Error::RecordTooLarge(plaintext.len()));
        }

        if self.queue_tx.len() >= self.config.max_queue_tx() {
            return Err(Error::TransmitQueueFull);
        }

        let seq = self.send_seq[epoch as usize];
        let mut sealed = self.buffers.pop();

        match self.record_layer.seal(epoch, seq, plaintext, &mut sealed) {
            Ok(()) => {}
            Err(RecordError::Fatal { code }) => {
                self.buffers.push(sealed);
                return self.abort(code);
            }
            Err(e) => {
                debug!("Record layer cannot seal epoch {}: {}", epoch, e);
                self.buffers.push(sealed);
                return Err(Error::InvalidState(self.session.state));
            }
        }

        if sealed.len() > Record::MAX_FRAGMENT_LEN {
            let len = sealed.len();
            self.buffers.push(sealed);
            return Err(Error::RecordTooLarge(len));
        }

        self.send_seq[epoch as usize] += 1;

        let mut datagram = self.buffers.pop();
        let record = Record {
            content_type: ContentType::ApplicationData,
            epoch,
            sequence: seq,
            fragment: &sealed,
        };
        if record.wire_len() > self.config.mtu() {
            warn!(
                "Record exceeds MTU ({} > {})",
                record.wire_len(),
                self.config.mtu()
            );
        }
        record.serialize(&mut datagram);
        self.buffers.push(sealed);

        self.queue_tx.push_back((peer, datagram));
        Ok(())
    }

    fn send_alert(&mut self, alert: Alert) {
        let Some(peer) = self.session.peer else {
            return;
        };

        if self.queue_tx.len() >= self.config.max_queue_tx() {
            warn!("Transmit queue full, drop alert {:?}", alert.description);
            return;
        }

        let mut fragment = Buf::new();
        alert.serialize(&mut fragment);

        let epoch = if self.session.state == State::Established {
            EPOCH_APPLICATION
        } else {
            EPOCH_INITIAL
        };

        let seq = self.send_seq[epoch as usize];
        let mut sealed = self.buffers.pop();

        if epoch == EPOCH_APPLICATION {
            if let Err(e) = self.record_layer.seal(epoch, seq, &fragment, &mut sealed) {
                debug!("Cannot seal alert {:?}: {}", alert.description, e);
                self.buffers.push(sealed);
                return;
            }
        } else {
            sealed.extend_from_slice(&fragment);
        }

        self.send_seq[epoch as usize] += 1;

        let mut datagram = self.buffers.pop();
        Record {
            content_type: ContentType::Alert,
            epoch,
            sequence: seq,
            fragment: &sealed,
        }
        .serialize(&mut datagram);
        self.buffers.push(sealed);

        self.queue_tx.push_back((peer, datagram));
    }

    fn next_send_seq(&mut self, epoch: u16) -> u64 {
        let slot = &mut self.send_seq[epoch as usize];
        let seq = *slot;
        *slot += 1;
        seq
    }

    // =====================================================================
    // Teardown
    // =====================================================================

    /// Tell the peer and fail the session with a handshake error.
    fn abort(&mut self, code: u8) -> Result<(), Error> {
        self.send_alert(Alert::fatal(code));
        self.fail(Failure::with_code(FailureKind::Handshake, code))
    }

    fn fail(&mut self, failure: Failure) -> Result<(), Error> {
        warn!("Session failed in {}: {}", self.session.state, failure);
        self.failure = Some(failure);
        self.close_session();
        Err(Error::Failed(failure))
    }

    fn close_session(&mut self) {
        self.clear_flight();
        self.transition(State::Closed);
        self.session.early_window = None;
        self.session.app_window = None;
        self.session.early = None;
        self.early_pending.clear();
        self.early_pending_bytes = 0;
    }
}

/// A HelloVerifyRequest answering a ClientHello statelessly.
///
/// Record and message sequence numbers echo the ClientHello's.
pub(crate) fn hello_verify_datagram(cookie: Cookie, record_seq: u64, message_seq: u16) -> Buf {
    let mut body = Buf::new();
    HelloVerifyRequest::new(cookie).serialize(&mut body);

    let mut fragment = Buf::new();
    Handshake {
        msg_type: MessageType::HelloVerifyRequest,
        message_seq,
        body: &body,
    }
    .serialize(&mut fragment);

    let mut datagram = Buf::new();
    Record {
        content_type: ContentType::Handshake,
        epoch: EPOCH_INITIAL,
        sequence: record_seq,
        fragment: &fragment,
    }
    .serialize(&mut datagram);

    datagram
}

impl<R> std::fmt::Debug for HandshakeCoordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeCoordinator")
            .field("role", &self.role)
            .field("session", &self.session)
            .field("queue_rx", &self.queue_rx)
            .field("queue_tx", &self.queue_tx)
            .field("failure", &self.failure)
            .finish()
    }
}

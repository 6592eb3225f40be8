//! Many peers on one socket.
//!
//! The listener answers cookie requests itself, without creating anything
//! per peer. A [`HandshakeCoordinator`] is created only for a ClientHello
//! that echoes a valid cookie.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::coordinator::hello_verify_datagram;
use crate::cookie::CookieStore;
use crate::error::Failure;
use crate::message::peek_client_hello;
use crate::queue::QueueTx;
use crate::record_layer::RecordLayer;
use crate::{Config, Error, HandshakeCoordinator, Output};

const DISTANT_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug)]
pub enum ListenerOutput<'a> {
    /// Datagram to send.
    Packet(SocketAddr, &'a [u8]),
    /// A session completed its handshake.
    Connected(SocketAddr),
    ApplicationData(SocketAddr, &'a [u8]),
    /// A session ended and was removed. `Some` if it failed.
    Closed(SocketAddr, Option<Failure>),
    /// Nothing to do before this instant.
    Timeout(Instant),
}

/// Server-side demultiplexer.
///
/// `make_record_layer` is called once per admitted peer.
pub struct Listener<R, F> {
    config: Arc<Config>,
    cookies: Arc<CookieStore>,
    make_record_layer: F,
    sessions: HashMap<SocketAddr, HandshakeCoordinator<R>>,
    queue_tx: QueueTx,
    last_now: Option<Instant>,
}

impl<R, F> Listener<R, F>
where
    R: RecordLayer,
    F: FnMut(SocketAddr) -> R,
{
    pub fn new(config: Arc<Config>, cookies: Arc<CookieStore>, make_record_layer: F) -> Self {
        Listener {
            config,
            cookies,
            make_record_layer,
            sessions: HashMap::new(),
            queue_tx: QueueTx::new(),
            last_now: None,
        }
    }

    pub fn cookies(&self) -> &Arc<CookieStore> {
        &self.cookies
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, peer: SocketAddr) -> Option<&HandshakeCoordinator<R>> {
        self.sessions.get(&peer)
    }

    pub fn session_mut(&mut self, peer: SocketAddr) -> Option<&mut HandshakeCoordinator<R>> {
        self.sessions.get_mut(&peer)
    }

    pub fn handle_datagram(&mut self, datagram: &[u8], peer: SocketAddr, now: Instant) {
        self.last_now = Some(now);

        if let Some(session) = self.sessions.get_mut(&peer) {
            if let Err(e) = session.on_datagram(datagram, peer, now) {
                debug!("Session {} failed: {}", peer, e);
            }
            return;
        }

        let Some(hello) = peek_client_hello(datagram) else {
            trace!("Drop datagram from unknown peer {}", peer);
            return;
        };

        if hello.cookie.is_empty() {
            debug!("Send HelloVerifyRequest to {}", peer);
            let cookie = self.cookies.issue(peer, now);
            if self.queue_tx.len() >= self.config.max_queue_tx() {
                warn!("Transmit queue full, drop HelloVerifyRequest to {}", peer);
                return;
            }
            let datagram = hello_verify_datagram(cookie, hello.record_seq, hello.message_seq);
            self.queue_tx.push_back((peer, datagram));
            return;
        }

        if !self.cookies.validate(peer, &hello.cookie, now) {
            debug!("Drop ClientHello with invalid cookie from {}", peer);
            return;
        }

        debug!("New session for {}", peer);
        let record_layer = (self.make_record_layer)(peer);
        let mut session =
            HandshakeCoordinator::accept(self.config.clone(), self.cookies.clone(), record_layer);

        if let Err(e) = session.on_datagram(datagram, peer, now) {
            debug!("Session {} failed on first flight: {}", peer, e);
        }

        self.sessions.insert(peer, session);
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        self.last_now = Some(now);

        for (peer, session) in self.sessions.iter_mut() {
            if let Err(e) = session.on_timer(now) {
                debug!("Session {} failed: {}", peer, e);
            }
        }
    }

    /// Send application data on an established session.
    pub fn send_application_data(&mut self, peer: SocketAddr, data: &[u8]) -> Result<(), Error> {
        let session = self
            .sessions
            .get_mut(&peer)
            .ok_or(Error::Closed)?;
        session.send_application_data(data)
    }

    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> ListenerOutput<'a> {
        if let Some((to, p)) = self.queue_tx.pop_front() {
            let len = p.len();
            assert!(len <= buf.len(), "Output buffer too small for packet");
            buf[..len].copy_from_slice(&p);
            return ListenerOutput::Packet(to, &buf[..len]);
        }

        let ready = self
            .sessions
            .iter()
            .find(|(_, s)| s.has_pending_output())
            .map(|(peer, _)| *peer);

        if let Some(peer) = ready {
            if let Some(session) = self.sessions.get_mut(&peer) {
                match session.poll_output(buf) {
                    Output::Packet(to, p) => return ListenerOutput::Packet(to, p),
                    Output::Connected => return ListenerOutput::Connected(peer),
                    Output::ApplicationData(d) => return ListenerOutput::ApplicationData(peer, d),
                    Output::Closed => {
                        let failure = session.failure();
                        self.sessions.remove(&peer);
                        debug!("Removed session {}", peer);
                        return ListenerOutput::Closed(peer, failure);
                    }
                    Output::Timeout(_) => {}
                }
            }
        }

        ListenerOutput::Timeout(self.next_timeout())
    }

    fn next_timeout(&self) -> Instant {
        self.sessions
            .values()
            .map(|s| s.next_timeout())
            .min()
            .unwrap_or_else(|| self.last_now.unwrap_or_else(Instant::now) + DISTANT_FUTURE)
    }
}

impl<R, F> std::fmt::Debug for Listener<R, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("sessions", &self.sessions.len())
            .field("queue_tx", &self.queue_tx)
            .finish()
    }
}

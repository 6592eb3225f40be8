//! The cryptographic collaborator.
//!
//! The coordinator decides *when* handshake messages are exchanged and what
//! happens on loss. Everything cryptographic (key schedule, AEAD, signature
//! checks) happens behind [`RecordLayer`].

use std::fmt;

use crate::buffer::Buf;
use crate::message::Message;
use crate::State;

/// Result of one [`RecordLayer::advance_handshake`] step.
#[derive(Debug, Default)]
pub struct Advance {
    /// State to move to. `None` keeps the current one.
    pub next: Option<State>,
    /// Our next flight, if this step produced one.
    pub flight: Option<Vec<Message>>,
    /// Application bytes decrypted as a side effect of the step.
    pub application_data: Option<Buf>,
}

impl Advance {
    pub fn to(next: State) -> Self {
        Advance {
            next: Some(next),
            ..Default::default()
        }
    }

    pub fn with_flight(mut self, flight: Vec<Message>) -> Self {
        self.flight = Some(flight);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    /// Not enough input yet. Try again after the next datagram.
    WantRead,
    /// This record failed authentication and is dropped.
    BadRecord,
    /// Handshake cannot continue. `code` is the alert description to send.
    Fatal { code: u8 },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::WantRead => write!(f, "want read"),
            RecordError::BadRecord => write!(f, "bad record"),
            RecordError::Fatal { code } => write!(f, "fatal record layer error ({})", code),
        }
    }
}

impl std::error::Error for RecordError {}

/// Cryptographic handshake and record protection.
///
/// `inbound` is `None` when the coordinator asks for our opening flight
/// (client ClientHello) and `Some` with a complete peer flight otherwise.
/// A ClientHello body passed either way is the payload after the cookie.
///
/// For the opening flight, [`Advance::next`] names the state to enter once
/// the cookie exchange is done: `AcceptingEarlyData` when 0-RTT is offered.
///
/// Handshake message bodies are opaque to the coordinator and carried as
/// produced. `seal`/`open` protect the early data and application data
/// records.
pub trait RecordLayer {
    fn advance_handshake(
        &mut self,
        state: State,
        inbound: Option<&[Message]>,
    ) -> Result<Advance, RecordError>;

    /// Protect `plaintext` for `epoch`/`seq` into `out`.
    fn seal(
        &mut self,
        epoch: u16,
        seq: u64,
        plaintext: &[u8],
        out: &mut Buf,
    ) -> Result<(), RecordError>;

    /// Authenticate and decrypt a record into `out`.
    fn open(
        &mut self,
        epoch: u16,
        seq: u64,
        ciphertext: &[u8],
        out: &mut Buf,
    ) -> Result<(), RecordError>;
}

impl<T: RecordLayer + ?Sized> RecordLayer for Box<T> {
    fn advance_handshake(
        &mut self,
        state: State,
        inbound: Option<&[Message]>,
    ) -> Result<Advance, RecordError> {
        (**self).advance_handshake(state, inbound)
    }

    fn seal(
        &mut self,
        epoch: u16,
        seq: u64,
        plaintext: &[u8],
        out: &mut Buf,
    ) -> Result<(), RecordError> {
        (**self).seal(epoch, seq, plaintext, out)
    }

    fn open(
        &mut self,
        epoch: u16,
        seq: u64,
        ciphertext: &[u8],
        out: &mut Buf,
    ) -> Result<(), RecordError> {
        (**self).open(epoch, seq, ciphertext, out)
    }
}

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors surfaced to the caller of the coordinator.
///
/// Per-datagram problems (bad cookies, replays, malformed input) never show
/// up here. They are logged and dropped.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session failed: {0}")]
    Failed(Failure),

    #[error("Session is closed")]
    Closed,

    #[error("Operation not allowed in state {0:?}")]
    InvalidState(crate::State),

    #[error("Transmit queue full")]
    TransmitQueueFull,

    #[error("Early data capacity exceeded")]
    CapacityExceeded,

    #[error("Record too large: {0} bytes")]
    RecordTooLarge(usize),

    #[error("Transport error: {0}")]
    Io(#[from] io::Error),
}

/// A session-fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// Diagnostic code, typically a TLS alert description.
    pub code: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The current flight was retransmitted `max_retransmits` times without progress.
    RetransmitLimit,
    /// No progress within the session idle timeout.
    IdleTimeout,
    /// The record layer reported a fatal handshake error.
    Handshake,
}

impl Failure {
    pub(crate) fn new(kind: FailureKind) -> Self {
        Failure { kind, code: None }
    }

    pub(crate) fn with_code(kind: FailureKind, code: u8) -> Self {
        Failure {
            kind,
            code: Some(code),
        }
    }

    /// Whether this failure is one of the timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::RetransmitLimit | FailureKind::IdleTimeout
        )
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::RetransmitLimit => "retransmit limit reached",
            FailureKind::IdleTimeout => "idle timeout",
            FailureKind::Handshake => "handshake error",
        };
        match self.code {
            Some(code) => write!(f, "{} (code {})", kind, code),
            None => write!(f, "{}", kind),
        }
    }
}

impl From<Failure> for Error {
    fn from(value: Failure) -> Self {
        Error::Failed(value)
    }
}

use std::fmt;

/// Handshake progress of one session.
///
/// Named from the server's perspective. The client walks the same states:
/// `AwaitingCookieEcho` after its first ClientHello, `AcceptingEarlyData`
/// while 0-RTT may be written, `CompletingHandshake` while waiting for the
/// server flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Idle,
    AwaitingCookieEcho,
    AcceptingEarlyData,
    CompletingHandshake,
    Established,
    Closed,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::AwaitingCookieEcho => "AwaitingCookieEcho",
            State::AcceptingEarlyData => "AcceptingEarlyData",
            State::CompletingHandshake => "CompletingHandshake",
            State::Established => "Established",
            State::Closed => "Closed",
        }
    }

    /// Whether `next` is a legal successor. Staying put is always legal.
    ///
    /// Any state may close. Otherwise states only move forward and
    /// `AcceptingEarlyData` is optional.
    pub fn can_advance_to(&self, next: State) -> bool {
        if next == *self || next == State::Closed {
            return true;
        }
        if *self == State::Closed {
            return false;
        }
        next > *self
    }

    pub fn is_handshaking(&self) -> bool {
        matches!(
            self,
            State::AwaitingCookieEcho | State::AcceptingEarlyData | State::CompletingHandshake
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

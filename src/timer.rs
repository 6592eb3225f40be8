use std::time::{Duration, Instant};

/// Result of polling a [`Timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Elapsed,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    Disabled,
    Armed(Instant),
    /// Reported as elapsed, waiting for `backoff()` or `cancel()`.
    Fired,
}

/// Retransmission timer for one flight.
///
/// Tracks a single deadline. The timeout doubles on every `backoff()` up to
/// `ceiling`.
#[derive(Debug)]
pub struct Timer {
    rto: Duration,
    ceiling: Duration,
    deadline: Deadline,
}

impl Timer {
    pub fn new(ceiling: Duration) -> Self {
        Timer {
            rto: Duration::ZERO,
            ceiling,
            deadline: Deadline::Disabled,
        }
    }

    /// Arm the timer to fire `initial_timeout` after `now`.
    pub fn start(&mut self, now: Instant, initial_timeout: Duration) {
        self.rto = initial_timeout.min(self.ceiling);
        self.deadline = Deadline::Armed(now + self.rto);
    }

    /// Returns `Elapsed` exactly once per expiry.
    pub fn poll(&mut self, now: Instant) -> Poll {
        match self.deadline {
            Deadline::Armed(at) if now >= at => {
                self.deadline = Deadline::Fired;
                Poll::Elapsed
            }
            _ => Poll::Pending,
        }
    }

    /// Double the timeout (capped at the ceiling) and re-arm from `now`.
    ///
    /// No-op on a cancelled timer.
    pub fn backoff(&mut self, now: Instant) {
        if self.deadline == Deadline::Disabled {
            return;
        }
        self.rto = self.rto.saturating_mul(2).min(self.ceiling);
        self.deadline = Deadline::Armed(now + self.rto);
    }

    pub fn cancel(&mut self) {
        self.rto = Duration::ZERO;
        self.deadline = Deadline::Disabled;
    }

    /// The instant the timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.deadline {
            Deadline::Armed(at) => Some(at),
            _ => None,
        }
    }

    /// Current timeout interval.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn is_armed(&self) -> bool {
        self.deadline != Deadline::Disabled
    }
}

//! Per-view delivery rate limiting (leading + trailing edge).

use std::time::{Duration, Instant};

/// What the limiter decided for one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Deliver now.
    Fire,
    /// A delivery is owed at the given instant.
    Deferred(Instant),
}

/// Fires immediately after idle, then at most once per interval while
/// notifications keep arriving.
#[derive(Debug, Clone)]
pub struct DeliveryLimiter {
    min_interval: Duration,
    last_fired: Option<Instant>,
    pending: bool,
}

impl DeliveryLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_fired: None,
            pending: false,
        }
    }

    pub fn set_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }

    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.last_fired {
            Some(last) if now.duration_since(last) < self.min_interval => {
                self.pending = true;
                Admission::Deferred(last + self.min_interval)
            }
            _ => {
                self.last_fired = Some(now);
                self.pending = false;
                Admission::Fire
            }
        }
    }

    /// When the owed trailing delivery becomes due, if any.
    pub fn trailing_deadline(&self) -> Option<Instant> {
        match (self.pending, self.last_fired) {
            (true, Some(last)) => Some(last + self.min_interval),
            _ => None,
        }
    }

    /// Consume the trailing delivery if it is due.
    pub fn take_trailing(&mut self, now: Instant) -> bool {
        match self.trailing_deadline() {
            Some(deadline) if now >= deadline => {
                self.pending = false;
                self.last_fired = Some(now);
                true
            }
            _ => false,
        }
    }
}

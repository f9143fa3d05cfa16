use std::time::Duration;

/// Exponential reconnect delay: base, 2×base, 4×base … capped at `max`, forever.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            next: base.min(max),
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to `base` after a connection proves healthy.
    pub fn reset(&mut self) {
        self.next = self.base.min(self.max);
    }
}

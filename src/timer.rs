use std::time::{Duration, Instant};

/// Recurring deadline checked from the pipeline loop.
///
/// A timer that has never fired is due immediately.
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    period: Duration,
    last: Option<Instant>,
}

impl PeriodicTimer {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.period,
        }
    }

    /// Returns true and restarts the period if the timer was due.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

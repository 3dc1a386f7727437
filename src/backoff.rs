//! Jittered exponential backoff schedule shared by store retries and
//! outbound platform dispatch.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with full jitter: each delay is drawn uniformly
/// from `(base/2 .. base]` where `base` doubles per attempt up to `cap`.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a schedule starting at `base` and capped at `cap`.
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base,
        }
    }

    /// Schedule for outbound platform dispatch: 500 ms base, doubling,
    /// capped at 30 s.
    #[must_use]
    pub fn for_dispatch() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }

    /// Next delay, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.current.min(self.cap);
        self.current = (self.current * 2).min(self.cap);

        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        let floor_ms = (ceiling_ms / 2).max(1);
        let jittered = rand::thread_rng().gen_range(floor_ms..=ceiling_ms.max(floor_ms));
        Duration::from_millis(jittered)
    }

    /// Reset the schedule back to its base delay.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

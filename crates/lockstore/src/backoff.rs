use std::time::Duration;

use rand::Rng;

/// Exponential backoff with additive jitter for retrying store calls.
///
/// Each delay is the current backoff plus up to half of it again, capped at
/// `max`. The backoff doubles after every delay.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.current.as_millis() as u64 / 2);
        let delay = (self.current + Duration::from_millis(jitter_ms)).min(self.max);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over from the base delay.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

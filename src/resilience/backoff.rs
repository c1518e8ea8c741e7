//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of each delay that is randomized away (0.0 - 1.0).
    pub jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        Self {
            base,
            max,
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based). Never exceeds `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let exponential_base = 2u64.saturating_pow(attempt - 1);
        let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

        // Jitter subtracts up to `jitter_ratio` of the delay so the cap holds.
        let jitter_range = (capped_delay as f64 * self.jitter_ratio) as u64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..=jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped_delay - jitter)
    }
}

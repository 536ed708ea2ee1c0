//! Bounded exponential backoff for transient refresh failures.

use std::time::Duration;

/// Retry schedule for the refresh-token exchange.
///
/// Attempt `n` (1-based) is preceded by a delay of `base_delay * 2^(n-2)`,
/// capped at `max_delay`; the first attempt runs immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts before the failure is surfaced.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait before the given 1-based attempt.
    ///
    /// Returns `None` for the first attempt and for attempts past the
    /// budget.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 || attempt > self.max_attempts {
            return None;
        }
        let exponent = attempt.saturating_sub(2).min(31);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        Some(delay.min(self.max_delay))
    }

    /// Upper bound on total time spent sleeping across all attempts.
    pub fn total_delay_bound(&self) -> Duration {
        (2..=self.max_attempts)
            .filter_map(|attempt| self.delay_before(attempt))
            .sum()
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 500 ms base delay, 4 s cap.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

//! Exponential backoff schedule for delivery retries

use std::time::Duration;

/// `delay = base * 2^attempt`, for at most `max_attempts` attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    /// At least one attempt is always made.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay to wait after the failed attempt number `attempt` (0-based),
    /// or `None` if that was the last attempt.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts {
            return None;
        }
        Some(self.base.saturating_mul(2u32.saturating_pow(attempt)))
    }

    /// Every delay between consecutive attempts.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts)
            .map_while(|attempt| self.delay_after(attempt))
            .collect()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 3)
    }
}

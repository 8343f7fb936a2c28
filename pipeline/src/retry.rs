//! Retry policy
//!
//! An explicit policy object (max attempts + backoff function) consumed by
//! the dispatch loops in the batch processor and the point writer, keeping
//! retry semantics out of the I/O code.

use std::time::Duration;

/// Bounded retry with linear backoff
///
/// Attempt 0 is the initial try and has no delay; retry `n` waits
/// `delay × n` before running.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (0 = no retries)
    pub max_attempts: u32,
    /// Base delay; retry `n` waits `delay × n`
    pub delay: Duration,
}

impl RetryPolicy {
    /// Linear backoff policy
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Delay before attempt `n` (0-indexed; attempt 0 is immediate)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay.saturating_mul(attempt)
        }
    }

    /// Total attempts including the initial one
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

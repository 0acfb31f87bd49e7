//! Exponential backoff for automatic reconnection.

use std::time::Duration;

/// Retry policy: `base_delay * 2^(attempt - 1)` for attempts `1..=max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

/// What to do after a failure, given how many retries have already been made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    pub fn next(&self, attempts_made: u32) -> ReconnectDecision {
        let attempt = attempts_made.saturating_add(1);
        if attempt > self.max_attempts {
            ReconnectDecision::Exhausted {
                attempts: self.max_attempts,
            }
        } else {
            ReconnectDecision::Retry {
                attempt,
                delay: self.delay_for_attempt(attempt),
            }
        }
    }
}

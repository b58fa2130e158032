use crate::config::RetryConfig;
use std::time::Duration;

/// Attempt budget and inter-attempt delays for backend operations.
/// A multiplier of 1.0 gives a fixed delay; larger values back off up to
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: config.delay.as_std(),
            multiplier: config.multiplier.max(1.0),
            max_delay: config.max_delay.as_std(),
        }
    }

    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Total attempts including the first
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before attempt `attempt` (0-indexed); the first attempt waits
    /// for nothing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = self.delay.as_millis() as f64 * factor;
        Duration::from_millis(millis as u64).min(self.max_delay.max(self.delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

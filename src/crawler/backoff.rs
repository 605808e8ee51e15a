//! Bounded exponential backoff for transient fetch failures

use crate::config::RetryConfig;
use std::time::Duration;

/// Retry policy applied by the crawl engine to transient fetch errors
///
/// Attempt `n` (1-based) that fails transiently is followed by a wait of
/// `base_delay * multiplier^(n-1)`, capped at `max_delay`. After
/// `max_attempts` failed attempts the article is marked failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Builds the policy from the `[retry]` config table
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Returns true if another attempt is allowed after `attempts` failures
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay to wait after the given (1-based) failed attempt
    ///
    /// # Arguments
    ///
    /// * `attempt` - Number of attempts made so far
    ///
    /// # Returns
    ///
    /// The delay before the next attempt, never more than `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;

        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

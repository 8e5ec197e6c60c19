//! Retry policy for failed imports.
//!
//! Implements exponential backoff with configurable parameters.

use crate::config::ImportQueueSettings;
use crate::import_queue::models::ImportFailure;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Initial backoff duration in seconds.
    pub initial_backoff_secs: u64,
    /// Maximum backoff duration in seconds (cap for exponential growth).
    pub max_backoff_secs: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &ImportQueueSettings) -> Self {
        Self {
            initial_backoff_secs: config.initial_backoff_secs,
            max_backoff_secs: config.max_backoff_secs,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Unix timestamp of the next attempt after `retry_count` failures.
    pub fn next_attempt_at(&self, retry_count: i32) -> i64 {
        chrono::Utc::now().timestamp() + self.backoff_secs(retry_count) as i64
    }

    /// Whether an item that has now failed `retry_count` times out of
    /// `max_retries` attempts goes back to pending.
    ///
    /// Permanent failures never do.
    pub fn should_retry(&self, failure: &ImportFailure, retry_count: i32, max_retries: i32) -> bool {
        failure.is_retryable() && retry_count < max_retries
    }

    /// Backoff in seconds: `initial * multiplier^(retry_count - 1)`, capped.
    pub fn backoff_secs(&self, retry_count: i32) -> u64 {
        let exponent = (retry_count - 1).max(0);
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        backoff.min(self.max_backoff_secs as f64) as u64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&ImportQueueSettings::default())
    }
}

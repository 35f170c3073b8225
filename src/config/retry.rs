//! Retry scheduler configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::domain::billing::RetryPolicy;

/// Backoff, dead-letter ceiling and polling for failed webhook events.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Failed attempts allowed before an event needs attention
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure, in seconds
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: i64,

    /// Upper bound on any single delay, in seconds
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: i64,

    /// How often the scheduler looks for due events, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Events retried per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl RetryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_secs: self.base_delay_secs,
            max_delay_secs: self.max_delay_secs,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Validate retry configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_delay_secs <= 0 || self.max_delay_secs < self.base_delay_secs {
            return Err(ValidationError::InvalidRetryDelays);
        }
        if self.poll_interval_secs == 0 || self.batch_size == 0 {
            return Err(ValidationError::InvalidRetrySchedule);
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> i64 {
    300
}

fn default_max_delay() -> i64 {
    3_600
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    50
}

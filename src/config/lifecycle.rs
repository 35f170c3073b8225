//! Subscription lifecycle job configuration

use serde::Deserialize;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// How long a `past_due` subscription keeps access before cancellation
    #[serde(default = "default_grace_period_hours")]
    pub grace_period_hours: u32,
}

impl LifecycleConfig {
    pub fn grace_period_secs(&self) -> i64 {
        i64::from(self.grace_period_hours) * 3_600
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.grace_period_hours == 0 {
            return Err(ValidationError::InvalidGracePeriod);
        }
        Ok(())
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_hours: default_grace_period_hours(),
        }
    }
}

fn default_grace_period_hours() -> u32 {
    24
}

//! Application configuration module
//!
//! Configuration is read from environment variables with the
//! `BILLING_INBOX` prefix using the `config` and `dotenvy` crates. Nested
//! values are separated by a double underscore.
//!
//! # Example
//!
//! ```no_run
//! use billing_inbox::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod database;
mod error;
mod lifecycle;
mod redis;
mod retry;
mod server;
mod webhook;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use lifecycle::LifecycleConfig;
pub use self::redis::RedisConfig;
pub use retry::RetryConfig;
pub use server::{Environment, LogFormat, ServerConfig};
pub use webhook::WebhookConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment, logging)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Webhook secrets, freshness window and edge limits
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Retry backoff and polling
    #[serde(default)]
    pub retry: RetryConfig,

    /// Grace period and expiry jobs
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Shared rate limit store; counters stay in process when absent
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `BILLING_INBOX` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `BILLING_INBOX__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `BILLING_INBOX__WEBHOOK__SECRETS_JSON={"stripe":"whsec_x"}` -> `webhook.secrets_json`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("BILLING_INBOX")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.webhook.validate()?;
        self.retry.validate()?;
        self.lifecycle.validate()?;
        if let Some(redis) = &self.redis {
            redis.validate()?;
        }
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

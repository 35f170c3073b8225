//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("Webhook secrets are not valid JSON: {0}")]
    InvalidWebhookSecrets(String),

    #[error("No webhook secret configured for provider '{0}'")]
    EmptySecretSet(String),

    #[error("Webhook max_skew_secs must be positive")]
    InvalidSkew,

    #[error("Webhook rate limit must be positive")]
    InvalidRateLimit,

    #[error("Trusted proxy '{0}' is not an IP address")]
    InvalidTrustedProxy(String),

    #[error("Retry delays must be positive and base_delay_secs must not exceed max_delay_secs")]
    InvalidRetryDelays,

    #[error("Retry poll interval and batch size must be positive")]
    InvalidRetrySchedule,

    #[error("Grace period must be positive")]
    InvalidGracePeriod,
}

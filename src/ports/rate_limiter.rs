//! Rate limiting port for the webhook edge.
//!
//! Limits are fixed-window counters keyed by `(provider, client_ip)`.
//! Implementations are injected: an in-memory map for a single instance,
//! Redis when several instances share the budget.

use async_trait::async_trait;

use crate::domain::foundation::Timestamp;

/// Port for rate limiting operations.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check if request is allowed, consuming one unit of quota if so.
    async fn check(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError>;

    /// Reset the current window for a key.
    async fn reset(&self, key: &RateLimitKey) -> Result<(), RateLimitError>;
}

/// Key identifying one rate-limited caller.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RateLimitKey {
    pub provider: String,
    pub client_ip: String,
}

impl RateLimitKey {
    pub fn webhook(provider: &str, client_ip: &str) -> Self {
        Self {
            provider: provider.to_string(),
            client_ip: client_ip.to_string(),
        }
    }

    /// Returns the Redis key string for this rate limit key.
    pub fn to_redis_key(&self) -> String {
        format!("ratelimit:webhook:{}:{}", self.provider, self.client_ip)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed; includes current status.
    Allowed(RateLimitStatus),
    /// Request is denied; includes denial details.
    Denied(RateLimitDenied),
}

impl RateLimitResult {
    /// Returns true if the request was allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed(_))
    }
}

/// Current rate limit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Maximum requests allowed in the window.
    pub limit: u32,
    /// Remaining requests in the current window.
    pub remaining: u32,
    /// When the current window resets.
    pub reset_at: Timestamp,
}

/// Details of a rate limit denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDenied {
    pub limit: u32,
    /// Seconds until the client should retry.
    pub retry_after_secs: u32,
}

/// Errors that can occur during rate limiting operations.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Rate limiter backend is unavailable.
    #[error("rate limiter unavailable: {0}")]
    Unavailable(String),
}

//! Edge rejection errors for inbound webhooks.
//!
//! These are resolved before anything is written: a request that fails
//! here never creates a webhook event row.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised while authenticating an inbound webhook envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// No candidate secret produced the provided signature.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature timestamp is further from now than the allowed skew.
    #[error("Stale timestamp")]
    StaleTimestamp,

    /// No secret set is configured for this provider.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// A required signature header is absent.
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// A signature header is present but unreadable.
    #[error("Invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The verified body is not a well-formed event envelope.
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl WebhookError {
    /// Maps the rejection to the HTTP status returned to the provider.
    ///
    /// - 403: authenticity or freshness failed
    /// - 401: the request could not be attributed to a configured provider
    /// - 400: authentic but malformed body
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature | WebhookError::StaleTimestamp => StatusCode::FORBIDDEN,
            WebhookError::UnknownProvider(_)
            | WebhookError::MissingHeader(_)
            | WebhookError::InvalidHeader(_) => StatusCode::UNAUTHORIZED,
            WebhookError::ParseError(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::InvalidSignature => "INVALID_SIGNATURE",
            WebhookError::StaleTimestamp => "STALE_TIMESTAMP",
            WebhookError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            WebhookError::MissingHeader(_) => "MISSING_HEADER",
            WebhookError::InvalidHeader(_) => "INVALID_HEADER",
            WebhookError::ParseError(_) => "INVALID_PAYLOAD",
        }
    }
}

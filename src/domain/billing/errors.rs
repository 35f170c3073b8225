//! Billing error types.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | NotFound | 404 |
//! | AlreadyExists | 409 |
//! | ValidationFailed | 400 |
//! | Infrastructure | 500 |

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionKey};

/// Domain failure raised by an event handler.
///
/// Every variant is recorded on the event row as `failed` and is eligible
/// for retry until the attempt ceiling is reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerFailure {
    /// The payload references a subscription that does not exist (yet).
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionKey),

    /// The payload does not satisfy the handler's contract.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The store failed while the handler ran.
    #[error("store failure: {0}")]
    Store(String),
}

impl HandlerFailure {
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        HandlerFailure::InvalidPayload(reason.into())
    }
}

impl From<DomainError> for HandlerFailure {
    fn from(err: DomainError) -> Self {
        HandlerFailure::Store(err.to_string())
    }
}

/// Errors returned by the billing application layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("Validation failed for '{field}': {message}")]
    ValidationFailed { field: String, message: String },

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl BillingError {
    pub fn subscription_not_found(key: &SubscriptionKey) -> Self {
        BillingError::NotFound {
            entity: "subscription",
            id: key.to_string(),
        }
    }

    pub fn event_not_found(id: impl Into<String>) -> Self {
        BillingError::NotFound {
            entity: "webhook event",
            id: id.into(),
        }
    }

    pub fn subscription_exists(key: &SubscriptionKey) -> Self {
        BillingError::AlreadyExists {
            entity: "subscription",
            id: key.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::ValidationFailed {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        BillingError::Infrastructure(message.into())
    }

    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            BillingError::NotFound { entity: "subscription", .. } => ErrorCode::SubscriptionNotFound,
            BillingError::NotFound { .. } => ErrorCode::WebhookEventNotFound,
            BillingError::AlreadyExists { .. } => ErrorCode::SubscriptionExists,
            BillingError::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            BillingError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ValidationFailed | ErrorCode::InvalidFormat => BillingError::ValidationFailed {
                field: err
                    .details
                    .get("field")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                message: err.message,
            },
            _ => BillingError::Infrastructure(err.to_string()),
        }
    }
}

impl From<crate::domain::foundation::ValidationError> for BillingError {
    fn from(err: crate::domain::foundation::ValidationError) -> Self {
        DomainError::from(err).into()
    }
}

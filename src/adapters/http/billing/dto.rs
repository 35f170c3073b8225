//! Request and response types for the billing HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::handlers::billing::IngestReport;
use crate::domain::billing::{
    Outcome, ProcessingStatus, Subscription, SubscriptionStatus, WebhookError, WebhookEvent,
};
use crate::domain::foundation::Timestamp;

// ════════════════════════════════════════════════════════════════════════════════
// Webhook Envelope
// ════════════════════════════════════════════════════════════════════════════════

/// The signed body a provider posts to `/v1/webhooks/{provider}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub payload_json: Value,
}

impl WebhookEnvelope {
    /// Parses a verified raw body.
    pub fn parse(raw_body: &[u8]) -> Result<Self, WebhookError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
            .map_err(|e| WebhookError::ParseError(format!("invalid webhook body: {}", e)))?;
        if envelope.event_id.trim().is_empty() {
            return Err(WebhookError::ParseError("event_id must not be empty".to_string()));
        }
        if envelope.event_type.trim().is_empty() {
            return Err(WebhookError::ParseError("event_type must not be empty".to_string()));
        }
        if !envelope.payload_json.is_object() {
            return Err(WebhookError::ParseError("payload_json must be an object".to_string()));
        }
        Ok(envelope)
    }
}

/// Response to a webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub provider: String,
    pub event_id: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// True when this is the stored result of an earlier delivery.
    pub replayed: bool,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<Timestamp>,
}

impl From<IngestReport> for IngestResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            provider: report.event.provider,
            event_id: report.event.event_id,
            outcome: report.outcome,
            reason: report.reason,
            replayed: report.replayed,
            attempt_count: report.event.attempt_count,
            next_retry_at: report.event.next_retry_at,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Read Models
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEventResponse {
    pub id: String,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub status: ProcessingStatus,
    pub attempt_count: u32,
    pub next_retry_at: Option<Timestamp>,
    pub needs_attention: bool,
    pub error_message: Option<String>,
    pub received_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub payload: Value,
}

impl From<WebhookEvent> for WebhookEventResponse {
    fn from(event: WebhookEvent) -> Self {
        Self {
            id: event.id.to_string(),
            provider: event.provider,
            event_id: event.event_id,
            event_type: event.event_type,
            status: event.status,
            attempt_count: event.attempt_count,
            next_retry_at: event.next_retry_at,
            needs_attention: event.needs_attention,
            error_message: event.error_message,
            received_at: event.received_at,
            processed_at: event.processed_at,
            payload: event.payload,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub provider: String,
    pub provider_subscription_id: String,
    pub provider_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
    pub past_due_since: Option<Timestamp>,
    pub canceled_at: Option<Timestamp>,
    pub expired_at: Option<Timestamp>,
    pub access_revoked: bool,
    pub current_period_end: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            provider: sub.provider,
            provider_subscription_id: sub.provider_subscription_id,
            provider_customer_id: sub.provider_customer_id,
            status: sub.status,
            cancel_at_period_end: sub.cancel_at_period_end,
            past_due_since: sub.past_due_since,
            canceled_at: sub.canceled_at,
            expired_at: sub.expired_at,
            access_revoked: sub.access_revoked,
            current_period_end: sub.current_period_end,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Requests
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub provider: String,
    #[serde(default)]
    pub provider_subscription_id: Option<String>,
    #[serde(default)]
    pub provider_customer_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAtPeriodEndRequest {
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderQuery {
    #[serde(default)]
    pub provider: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Errors
// ════════════════════════════════════════════════════════════════════════════════

/// Standard error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(error_code: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_parses_valid_body() {
        let body = br#"{"event_id":"evt_1","event_type":"payment.succeeded","payload_json":{"a":1}}"#;
        let envelope = WebhookEnvelope::parse(body).unwrap();
        assert_eq!(envelope.event_id, "evt_1");
        assert_eq!(envelope.payload_json, json!({"a": 1}));
    }

    #[test]
    fn envelope_rejects_non_object_payload() {
        let body = br#"{"event_id":"evt_1","event_type":"payment.succeeded","payload_json":"x"}"#;
        assert!(matches!(WebhookEnvelope::parse(body), Err(WebhookError::ParseError(_))));
    }

    #[test]
    fn envelope_rejects_malformed_json_and_blank_ids() {
        assert!(WebhookEnvelope::parse(b"not json").is_err());
        let blank = br#"{"event_id":" ","event_type":"payment.succeeded","payload_json":{}}"#;
        assert!(WebhookEnvelope::parse(blank).is_err());
    }

    #[test]
    fn error_response_serializes_without_details_when_none() {
        let json = serde_json::to_string(&ErrorResponse::new("NOT_FOUND", "Not found")).unwrap();
        assert!(!json.contains("details"));
    }
}

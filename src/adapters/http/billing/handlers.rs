//! HTTP handlers for webhook ingestion, jobs and subscription admin.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::dto::{
    CancelAtPeriodEndRequest, CreateSubscriptionRequest, ErrorResponse, IngestResponse, LimitQuery,
    ProviderQuery, SubscriptionResponse, WebhookEnvelope, WebhookEventResponse,
};
use crate::application::handlers::billing::{
    BillingQueries, CreateSubscriptionCommand, CreateSubscriptionHandler, IngestWebhookCommand,
    IngestionCoordinator, LifecycleJobs, RetryScheduler, SetCancelAtPeriodEndCommand,
    SetCancelAtPeriodEndHandler,
};
use crate::domain::billing::{BillingError, Outcome, SignatureVerifier, WebhookError, WebhookSignature};
use crate::domain::foundation::{EventKey, SubscriptionKey};
use crate::ports::{Clock, InboxStore};

pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const KEY_ID_HEADER: &str = "X-Webhook-Key-Id";

/// Default page size for the event list and the retry job.
const DEFAULT_LIMIT: u32 = 50;

/// Shared state for billing handlers.
#[derive(Clone)]
pub struct BillingAppState {
    pub store: Arc<dyn InboxStore>,
    pub clock: Arc<dyn Clock>,
    pub verifier: Arc<SignatureVerifier>,
    pub coordinator: Arc<IngestionCoordinator>,
    pub scheduler: Arc<RetryScheduler>,
    pub lifecycle: Arc<LifecycleJobs>,
}

impl BillingAppState {
    pub fn queries(&self) -> BillingQueries {
        BillingQueries::new(self.store.clone())
    }

    pub fn create_subscription_handler(&self) -> CreateSubscriptionHandler {
        CreateSubscriptionHandler::new(self.store.clone(), self.clock.clone())
    }

    pub fn set_cancel_at_period_end_handler(&self) -> SetCancelAtPeriodEndHandler {
        SetCancelAtPeriodEndHandler::new(self.store.clone(), self.clock.clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook Receiver
// ════════════════════════════════════════════════════════════════════════════════

/// `POST /v1/webhooks/:provider`
///
/// Checks run in order: provider known, headers readable, signature valid
/// and fresh, body well formed. Only then is anything written.
pub async fn receive_webhook(
    State(state): State<BillingAppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, BillingApiError> {
    if !state.verifier.knows_provider(&provider) {
        return Err(WebhookError::UnknownProvider(provider).into());
    }

    let timestamp_text = header_str(&headers, TIMESTAMP_HEADER)?
        .ok_or(WebhookError::MissingHeader(TIMESTAMP_HEADER))?
        .trim();
    let timestamp = timestamp_text
        .parse::<i64>()
        .map_err(|_| WebhookError::InvalidHeader(TIMESTAMP_HEADER))?;
    let signature =
        header_str(&headers, SIGNATURE_HEADER)?.ok_or(WebhookError::MissingHeader(SIGNATURE_HEADER))?;
    let key_id = header_str(&headers, KEY_ID_HEADER)?;

    let sig = WebhookSignature {
        timestamp,
        timestamp_text,
        signature,
        key_id,
    };
    if let Err(e) = state.verifier.verify(&provider, &body, &sig, state.clock.now()) {
        tracing::warn!(provider = %provider, error = %e, "Rejected webhook");
        return Err(e.into());
    }

    let envelope = WebhookEnvelope::parse(&body)?;
    let key = EventKey::new(provider, envelope.event_id)
        .map_err(|e| WebhookError::ParseError(e.to_string()))?;

    let report = state
        .coordinator
        .ingest(IngestWebhookCommand {
            key,
            event_type: envelope.event_type,
            payload: envelope.payload_json,
            signature_timestamp: timestamp,
            signature: signature.to_string(),
        })
        .await?;

    let status = outcome_status(report.outcome);
    Ok((status, Json(IngestResponse::from(report))).into_response())
}

/// Maps an ingestion outcome to the response status.
///
/// `failed` is 202: the event is durably recorded and a retry is scheduled,
/// so the provider should not redeliver.
pub fn outcome_status(outcome: Outcome) -> StatusCode {
    match outcome {
        Outcome::Processed | Outcome::Ignored => StatusCode::OK,
        Outcome::Failed => StatusCode::ACCEPTED,
        Outcome::DuplicateRejected => StatusCode::FORBIDDEN,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, WebhookError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| WebhookError::InvalidHeader(name)),
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook Admin
// ════════════════════════════════════════════════════════════════════════════════

/// `GET /v1/webhooks?limit=`
pub async fn list_webhook_events(
    State(state): State<BillingAppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<WebhookEventResponse>>, BillingApiError> {
    let events = state
        .queries()
        .list_webhook_events(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(events.into_iter().map(WebhookEventResponse::from).collect()))
}

/// `GET /v1/webhooks/:event_id?provider=`
pub async fn get_webhook_event(
    State(state): State<BillingAppState>,
    Path(event_id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<WebhookEventResponse>, BillingApiError> {
    let event = state
        .queries()
        .get_webhook_event(&event_id, query.provider.as_deref())
        .await?;
    Ok(Json(event.into()))
}

/// `POST /v1/admin/webhooks/:provider/:event_id/reprocess`
pub async fn reprocess_webhook_event(
    State(state): State<BillingAppState>,
    Path((provider, event_id)): Path<(String, String)>,
) -> Result<Json<IngestResponse>, BillingApiError> {
    let key = EventKey::new(provider, event_id)?;
    let report = state.coordinator.reprocess(&key).await?;
    Ok(Json(report.into()))
}

// ════════════════════════════════════════════════════════════════════════════════
// Jobs
// ════════════════════════════════════════════════════════════════════════════════

/// `POST /v1/jobs/retry-failed-webhooks?limit=`
pub async fn retry_failed_webhooks(
    State(state): State<BillingAppState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, BillingApiError> {
    let report = state
        .scheduler
        .retry_due_events(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(report))
}

/// `POST /v1/jobs/enforce-grace`
pub async fn enforce_grace(State(state): State<BillingAppState>) -> Result<impl IntoResponse, BillingApiError> {
    Ok(Json(state.lifecycle.enforce_grace().await?))
}

/// `POST /v1/jobs/expire-subscriptions`
pub async fn expire_subscriptions(
    State(state): State<BillingAppState>,
) -> Result<impl IntoResponse, BillingApiError> {
    Ok(Json(state.lifecycle.expire_subscriptions().await?))
}

// ════════════════════════════════════════════════════════════════════════════════
// Subscriptions
// ════════════════════════════════════════════════════════════════════════════════

/// `POST /v1/subscriptions`
pub async fn create_subscription(
    State(state): State<BillingAppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let subscription = state
        .create_subscription_handler()
        .handle(CreateSubscriptionCommand {
            provider: request.provider,
            provider_subscription_id: request.provider_subscription_id,
            provider_customer_id: request.provider_customer_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(SubscriptionResponse::from(subscription))))
}

/// `GET /v1/subscriptions/:provider/:id`
pub async fn get_subscription(
    State(state): State<BillingAppState>,
    Path((provider, id)): Path<(String, String)>,
) -> Result<Json<SubscriptionResponse>, BillingApiError> {
    let key = SubscriptionKey::new(provider, id)?;
    let subscription = state.queries().get_subscription(&key).await?;
    Ok(Json(subscription.into()))
}

/// `POST /v1/subscriptions/:provider/:id/cancel-at-period-end`
pub async fn set_cancel_at_period_end(
    State(state): State<BillingAppState>,
    Path((provider, id)): Path<(String, String)>,
    Json(request): Json<CancelAtPeriodEndRequest>,
) -> Result<Json<SubscriptionResponse>, BillingApiError> {
    let key = SubscriptionKey::new(provider, id)?;
    let subscription = state
        .set_cancel_at_period_end_handler()
        .handle(SetCancelAtPeriodEndCommand {
            key,
            cancel_at_period_end: request.cancel_at_period_end,
        })
        .await?;
    Ok(Json(subscription.into()))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts edge and application errors to HTTP responses.
#[derive(Debug)]
pub enum BillingApiError {
    Webhook(WebhookError),
    Billing(BillingError),
}

impl From<WebhookError> for BillingApiError {
    fn from(err: WebhookError) -> Self {
        Self::Webhook(err)
    }
}

impl From<BillingError> for BillingApiError {
    fn from(err: BillingError) -> Self {
        Self::Billing(err)
    }
}

impl From<crate::domain::foundation::ValidationError> for BillingApiError {
    fn from(err: crate::domain::foundation::ValidationError) -> Self {
        Self::Billing(err.into())
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            BillingApiError::Webhook(err) => (err.status_code(), ErrorResponse::new(err.code(), err.to_string())),
            BillingApiError::Billing(err) => {
                let status = match err {
                    BillingError::NotFound { .. } => StatusCode::NOT_FOUND,
                    BillingError::AlreadyExists { .. } => StatusCode::CONFLICT,
                    BillingError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
                    BillingError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "Billing request failed");
                    (status, ErrorResponse::new("INTERNAL_ERROR", "internal processing error"))
                } else {
                    (status, ErrorResponse::new(err.code().to_string(), err.to_string()))
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

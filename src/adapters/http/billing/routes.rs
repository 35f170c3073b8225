//! Axum router configuration for billing endpoints.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::handlers::{
    create_subscription, enforce_grace, expire_subscriptions, get_subscription, get_webhook_event,
    list_webhook_events, receive_webhook, reprocess_webhook_event, retry_failed_webhooks,
    set_cancel_at_period_end, BillingAppState,
};
use crate::adapters::http::middleware::{edge_guard_middleware, EdgeGuardState};

/// Create the billing API router.
///
/// # Routes
///
/// ## Provider Endpoints (edge guard, signature verified)
/// - `POST /webhooks/:id` - Signed webhook delivery; `:id` is the provider
///
/// ## Operator Endpoints
/// - `GET /webhooks` - Recent webhook events (`?limit=`)
/// - `GET /webhooks/:id` - One webhook event by event id (`?provider=` to disambiguate)
/// - `POST /admin/webhooks/:provider/:event_id/reprocess` - Manual reprocess
/// - `POST /jobs/retry-failed-webhooks` - Retry due events (`?limit=`)
/// - `POST /jobs/enforce-grace` - Cancel past-due subscriptions after grace
/// - `POST /jobs/expire-subscriptions` - Close ended periods
/// - `POST /subscriptions` - Create a subscription
/// - `GET /subscriptions/:provider/:id` - Read a subscription
/// - `POST /subscriptions/:provider/:id/cancel-at-period-end` - Toggle flag
///
/// The POST and GET on `/webhooks/:id` share one path, so the edge guard is
/// attached to the POST method router only.
pub fn billing_routes(guard: EdgeGuardState) -> Router<BillingAppState> {
    Router::new()
        .route("/webhooks", get(list_webhook_events))
        .route(
            "/webhooks/:id",
            post(receive_webhook)
                .route_layer(middleware::from_fn_with_state(guard, edge_guard_middleware))
                .get(get_webhook_event),
        )
        .route(
            "/admin/webhooks/:provider/:event_id/reprocess",
            post(reprocess_webhook_event),
        )
        .route("/jobs/retry-failed-webhooks", post(retry_failed_webhooks))
        .route("/jobs/enforce-grace", post(enforce_grace))
        .route("/jobs/expire-subscriptions", post(expire_subscriptions))
        .route("/subscriptions", post(create_subscription))
        .route("/subscriptions/:provider/:id", get(get_subscription))
        .route(
            "/subscriptions/:provider/:id/cancel-at-period-end",
            post(set_cancel_at_period_end),
        )
}

/// The complete billing API, mounted at `/v1`.
///
/// # Example
///
/// ```ignore
/// let app = billing_router(guard).with_state(app_state);
/// ```
pub fn billing_router(guard: EdgeGuardState) -> Router<BillingAppState> {
    Router::new().nest("/v1", billing_routes(guard))
}

//! HTTP adapter for billing endpoints.
//!
//! - `POST /v1/webhooks/:provider` - Signed webhook delivery
//! - `GET /v1/webhooks`, `GET /v1/webhooks/:event_id` - Inbox inspection
//! - `POST /v1/admin/webhooks/:provider/:event_id/reprocess` - Manual reprocess
//! - `POST /v1/jobs/*` - Retry, grace and expiry jobs
//! - `/v1/subscriptions/*` - Subscription administration

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::ErrorResponse;
pub use handlers::{BillingAppState, BillingApiError, KEY_ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
pub use routes::billing_router;

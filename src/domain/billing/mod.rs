//! Billing domain module.
//!
//! Subscription lifecycle, the webhook inbox record, and verification of
//! inbound provider events.
//!
//! # Module Structure
//!
//! - `status` - SubscriptionStatus state machine
//! - `subscription` - Subscription aggregate
//! - `transitions` - the transition function shared by webhooks and jobs
//! - `registry` - event type to handler routing
//! - `webhook_event` - inbox row and its retry bookkeeping
//! - `webhook_verifier` - HMAC signature and freshness checks

mod errors;
mod outcome;
mod payload;
mod registry;
mod retry_policy;
mod status;
mod subscription;
mod transitions;
mod webhook_errors;
mod webhook_event;
mod webhook_verifier;

pub use errors::{BillingError, HandlerFailure};
pub use outcome::Outcome;
pub use payload::{PaymentPayload, PeriodEnd};
pub use registry::{handle, route, EventType, HandlerInput};
pub use retry_policy::RetryPolicy;
pub use status::SubscriptionStatus;
pub use subscription::Subscription;
pub use transitions::{apply, BillingTrigger, IgnoreReason, Transition};
pub use webhook_errors::WebhookError;
pub use webhook_event::{ProcessingStatus, ReplayMismatch, WebhookEvent};
pub use webhook_verifier::{
    sign_payload, SecretSet, SignatureVerifier, WebhookSignature, DEFAULT_MAX_SKEW_SECS,
};

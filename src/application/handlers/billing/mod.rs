//! Billing handlers - webhook ingestion, retries, lifecycle jobs and admin.

mod create_subscription;
mod ingest_webhook;
mod lifecycle_jobs;
mod queries;
mod retry_failed_events;
mod set_cancel_at_period_end;

pub use create_subscription::{CreateSubscriptionCommand, CreateSubscriptionHandler};
pub use ingest_webhook::{
    IngestReport, IngestWebhookCommand, IngestionCoordinator, Redispatch, RetryGate,
};
pub use lifecycle_jobs::{ExpiryReport, GraceReport, LifecycleJobs, DEFAULT_GRACE_PERIOD_SECS};
pub use queries::{BillingQueries, MAX_LIST_LIMIT};
pub use retry_failed_events::{RetryReport, RetryScheduler, RetrySchedulerConfig};
pub use set_cancel_at_period_end::{SetCancelAtPeriodEndCommand, SetCancelAtPeriodEndHandler};

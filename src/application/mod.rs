//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Commands (ingest, reprocess, create, jobs) write through `InboxTransaction`;
//! queries read through `InboxStore` directly.

pub mod handlers;

pub use handlers::billing::{
    BillingQueries, CreateSubscriptionCommand, CreateSubscriptionHandler, ExpiryReport, GraceReport,
    IngestReport, IngestWebhookCommand, IngestionCoordinator, LifecycleJobs, RetryReport,
    RetryScheduler, RetrySchedulerConfig, SetCancelAtPeriodEndCommand, SetCancelAtPeriodEndHandler,
};

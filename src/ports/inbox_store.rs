//! InboxStore port - durable webhook events and subscriptions.
//!
//! The two tables live behind one port because every ingestion writes both
//! in a single transaction: the event row and the subscription row either
//! commit together or not at all.
//!
//! ## Uniqueness
//!
//! `(provider, event_id)` is unique in the store itself. Implementations
//! must report a duplicate insert as `InsertResult::AlreadyExists` rather
//! than checking beforehand; the constraint is the only arbiter that holds
//! across service instances.
//!
//! ## Locking
//!
//! `lock_*` reads take a row lock (or equivalent) held until the
//! transaction ends, so concurrent transitions on the same subscription are
//! serialized instead of interleaving.

use async_trait::async_trait;

use crate::domain::billing::{Subscription, SubscriptionStatus, WebhookEvent};
use crate::domain::foundation::{DomainError, EventKey, SubscriptionKey, Timestamp};

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Row was inserted (first time seeing this key).
    Inserted,
    /// A row with the same key already exists.
    AlreadyExists,
}

/// Entry point to the inbox tables.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Opens a transaction. Dropping it without `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn InboxTransaction>, DomainError>;

    /// Reads one event outside any transaction.
    async fn find_event(&self, key: &EventKey) -> Result<Option<WebhookEvent>, DomainError>;

    /// All events carrying `event_id`, across providers.
    async fn find_events_by_event_id(&self, event_id: &str) -> Result<Vec<WebhookEvent>, DomainError>;

    /// Most recently received events first.
    async fn list_events(&self, limit: u32) -> Result<Vec<WebhookEvent>, DomainError>;

    /// Keys of failed events due for retry at `now`, oldest schedule first.
    ///
    /// Selects `status = failed AND needs_attention = false AND next_retry_at <= now`.
    async fn list_due_for_retry(&self, now: Timestamp, limit: u32) -> Result<Vec<EventKey>, DomainError>;

    /// Reads one subscription outside any transaction.
    async fn find_subscription(&self, key: &SubscriptionKey) -> Result<Option<Subscription>, DomainError>;
}

/// One atomic unit of work over both tables.
#[async_trait]
pub trait InboxTransaction: Send {
    /// Inserts a new event row, reporting a key conflict instead of failing.
    async fn insert_event(&mut self, event: &WebhookEvent) -> Result<InsertResult, DomainError>;

    /// Reads an event as committed by other transactions.
    async fn find_event(&mut self, key: &EventKey) -> Result<Option<WebhookEvent>, DomainError>;

    /// Reads an event and locks its row until this transaction ends.
    async fn lock_event(&mut self, key: &EventKey) -> Result<Option<WebhookEvent>, DomainError>;

    /// Overwrites the mutable fields of an existing event row.
    async fn update_event(&mut self, event: &WebhookEvent) -> Result<(), DomainError>;

    /// Reads a subscription and locks its row until this transaction ends.
    async fn lock_subscription(&mut self, key: &SubscriptionKey) -> Result<Option<Subscription>, DomainError>;

    /// Locks every subscription currently in `status`.
    async fn lock_subscriptions_by_status(
        &mut self,
        status: SubscriptionStatus,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Inserts a new subscription row, reporting a key conflict instead of failing.
    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<InsertResult, DomainError>;

    /// Overwrites the mutable fields of an existing subscription row.
    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError>;

    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}

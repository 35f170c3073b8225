//! In-memory inbox store for tests and single-instance deployments.
//!
//! A transaction holds the store's mutex for its whole lifetime and works on
//! a staged copy of the tables. `commit` publishes the copy; dropping the
//! transaction discards it. Holding the mutex serializes transactions, which
//! gives the same observable behaviour as row locks plus a unique index:
//! a second insert of the same key waits for the first to finish and then
//! sees the committed row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::billing::{Subscription, SubscriptionStatus, WebhookEvent};
use crate::domain::foundation::{DomainError, ErrorCode, EventKey, SubscriptionKey, Timestamp};
use crate::ports::{InboxStore, InboxTransaction, InsertResult};

#[derive(Debug, Clone, Default)]
struct InboxState {
    events: HashMap<EventKey, WebhookEvent>,
    subscriptions: HashMap<SubscriptionKey, Subscription>,
}

/// Mutex-guarded inbox tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInboxStore {
    state: Arc<Mutex<InboxState>>,
    fail_subscription_writes: Arc<AtomicBool>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent subscription write fail with a database error.
    ///
    /// Lets tests exercise the path where the store breaks mid-dispatch.
    pub fn fail_subscription_writes(&self, fail: bool) {
        self.fail_subscription_writes.store(fail, Ordering::SeqCst);
    }

    /// Seeds a subscription directly, bypassing transactions.
    pub async fn put_subscription(&self, subscription: Subscription) {
        let mut state = self.state.lock().await;
        state.subscriptions.insert(subscription.key(), subscription);
    }

    /// Number of stored events.
    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn begin(&self) -> Result<Box<dyn InboxTransaction>, DomainError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = InboxState::clone(&guard);
        Ok(Box::new(InMemoryTransaction {
            guard,
            staged,
            fail_subscription_writes: self.fail_subscription_writes.clone(),
        }))
    }

    async fn find_event(&self, key: &EventKey) -> Result<Option<WebhookEvent>, DomainError> {
        Ok(self.state.lock().await.events.get(key).cloned())
    }

    async fn find_events_by_event_id(&self, event_id: &str) -> Result<Vec<WebhookEvent>, DomainError> {
        let state = self.state.lock().await;
        let mut events: Vec<WebhookEvent> = state
            .events
            .values()
            .filter(|e| e.event_id == event_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(events)
    }

    async fn list_events(&self, limit: u32) -> Result<Vec<WebhookEvent>, DomainError> {
        let state = self.state.lock().await;
        let mut events: Vec<WebhookEvent> = state.events.values().cloned().collect();
        events.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn list_due_for_retry(&self, now: Timestamp, limit: u32) -> Result<Vec<EventKey>, DomainError> {
        let state = self.state.lock().await;
        let mut due: Vec<&WebhookEvent> = state
            .events
            .values()
            .filter(|e| e.is_due_for_retry(now))
            .collect();
        due.sort_by(|a, b| a.next_retry_at.cmp(&b.next_retry_at));
        Ok(due.into_iter().take(limit as usize).map(WebhookEvent::key).collect())
    }

    async fn find_subscription(&self, key: &SubscriptionKey) -> Result<Option<Subscription>, DomainError> {
        Ok(self.state.lock().await.subscriptions.get(key).cloned())
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<InboxState>,
    staged: InboxState,
    fail_subscription_writes: Arc<AtomicBool>,
}

impl InMemoryTransaction {
    fn check_subscription_write(&self) -> Result<(), DomainError> {
        if self.fail_subscription_writes.load(Ordering::SeqCst) {
            return Err(DomainError::new(
                ErrorCode::DatabaseError,
                "Failed to write subscription: injected failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl InboxTransaction for InMemoryTransaction {
    async fn insert_event(&mut self, event: &WebhookEvent) -> Result<InsertResult, DomainError> {
        let key = event.key();
        if self.staged.events.contains_key(&key) {
            return Ok(InsertResult::AlreadyExists);
        }
        self.staged.events.insert(key, event.clone());
        Ok(InsertResult::Inserted)
    }

    async fn find_event(&mut self, key: &EventKey) -> Result<Option<WebhookEvent>, DomainError> {
        Ok(self.staged.events.get(key).cloned())
    }

    async fn lock_event(&mut self, key: &EventKey) -> Result<Option<WebhookEvent>, DomainError> {
        Ok(self.staged.events.get(key).cloned())
    }

    async fn update_event(&mut self, event: &WebhookEvent) -> Result<(), DomainError> {
        match self.staged.events.get_mut(&event.key()) {
            Some(stored) => {
                *stored = event.clone();
                Ok(())
            }
            None => Err(DomainError::new(
                ErrorCode::WebhookEventNotFound,
                format!("Webhook event not found: {}", event.key()),
            )),
        }
    }

    async fn lock_subscription(&mut self, key: &SubscriptionKey) -> Result<Option<Subscription>, DomainError> {
        Ok(self.staged.subscriptions.get(key).cloned())
    }

    async fn lock_subscriptions_by_status(
        &mut self,
        status: SubscriptionStatus,
    ) -> Result<Vec<Subscription>, DomainError> {
        let mut matching: Vec<Subscription> = self
            .staged
            .subscriptions
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        Ok(matching)
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<InsertResult, DomainError> {
        self.check_subscription_write()?;
        let key = subscription.key();
        if self.staged.subscriptions.contains_key(&key) {
            return Ok(InsertResult::AlreadyExists);
        }
        self.staged.subscriptions.insert(key, subscription.clone());
        Ok(InsertResult::Inserted)
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        self.check_subscription_write()?;
        match self.staged.subscriptions.get_mut(&subscription.key()) {
            Some(stored) => {
                *stored = subscription.clone();
                Ok(())
            }
            None => Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription not found: {}", subscription.key()),
            )),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let InMemoryTransaction {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::ProcessingStatus;
    use serde_json::json;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs("test", secs).unwrap()
    }

    fn event(event_id: &str) -> WebhookEvent {
        WebhookEvent::received(
            EventKey::new("stripe", event_id).unwrap(),
            "payment.succeeded",
            json!({}),
            1_000,
            "aa",
            at(1_000),
        )
    }

    fn subscription(id: &str) -> Subscription {
        Subscription::pending(SubscriptionKey::new("stripe", id).unwrap(), None, at(0))
    }

    #[tokio::test]
    async fn committed_insert_is_visible() {
        let store = InMemoryInboxStore::new();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.insert_event(&event("evt_1")).await.unwrap(), InsertResult::Inserted);
        tx.commit().await.unwrap();

        let key = EventKey::new("stripe", "evt_1").unwrap();
        assert!(store.find_event(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryInboxStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_event(&event("evt_1")).await.unwrap();
        }
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_key_reports_already_exists() {
        let store = InMemoryInboxStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_event(&event("evt_1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.insert_event(&event("evt_1")).await.unwrap(),
            InsertResult::AlreadyExists
        );
    }

    #[tokio::test]
    async fn rollback_discards_event_and_subscription_together() {
        let store = InMemoryInboxStore::new();
        store.put_subscription(subscription("sub_1")).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_event(&event("evt_1")).await.unwrap();
        let mut sub = tx
            .lock_subscription(&SubscriptionKey::new("stripe", "sub_1").unwrap())
            .await
            .unwrap()
            .unwrap();
        sub.status = SubscriptionStatus::Active;
        tx.update_subscription(&sub).await.unwrap();
        tx.rollback().await.unwrap();

        let stored = store
            .find_subscription(&SubscriptionKey::new("stripe", "sub_1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SubscriptionStatus::PendingActivation);
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn injected_failure_breaks_subscription_writes() {
        let store = InMemoryInboxStore::new();
        store.put_subscription(subscription("sub_1")).await;
        store.fail_subscription_writes(true);

        let mut tx = store.begin().await.unwrap();
        let err = tx.update_subscription(&subscription("sub_1")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }

    #[tokio::test]
    async fn list_due_for_retry_filters_and_orders() {
        let store = InMemoryInboxStore::new();
        let policy = crate::domain::billing::RetryPolicy::default();

        let mut late = event("evt_late");
        late.record_failure("x", &policy, at(2_000)); // due at 2_300
        let mut early = event("evt_early");
        early.record_failure("x", &policy, at(1_900)); // due at 2_200
        let mut dead = event("evt_dead");
        for _ in 0..4 {
            dead.record_failure("x", &policy, at(1_000));
        }
        let processed = event("evt_ok");

        let mut tx = store.begin().await.unwrap();
        for e in [&late, &early, &dead, &processed] {
            tx.insert_event(e).await.unwrap();
        }
        tx.commit().await.unwrap();

        let due = store.list_due_for_retry(at(2_300), 10).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|k| k.event_id.as_str()).collect();
        assert_eq!(ids, vec!["evt_early", "evt_late"]);

        let limited = store.list_due_for_retry(at(2_300), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(processed.status, ProcessingStatus::Received);
    }

    #[tokio::test]
    async fn lock_subscriptions_by_status_filters() {
        let store = InMemoryInboxStore::new();
        let mut active = subscription("sub_active");
        active.status = SubscriptionStatus::Active;
        store.put_subscription(active).await;
        store.put_subscription(subscription("sub_pending")).await;

        let mut tx = store.begin().await.unwrap();
        let found = tx
            .lock_subscriptions_by_status(SubscriptionStatus::Active)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider_subscription_id, "sub_active");
    }

    #[tokio::test]
    async fn lock_subscriptions_by_status_breaks_created_at_ties_by_id() {
        let store = InMemoryInboxStore::new();
        for id in ["sub_a", "sub_b", "sub_c", "sub_d"] {
            store.put_subscription(subscription(id)).await;
        }

        let mut tx = store.begin().await.unwrap();
        let found = tx
            .lock_subscriptions_by_status(SubscriptionStatus::PendingActivation)
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|s| *s.id.as_uuid()).collect();
        let mut sorted = ids.clone();
        sorted.sort();

        assert_eq!(found.len(), 4);
        assert_eq!(ids, sorted);
    }
}

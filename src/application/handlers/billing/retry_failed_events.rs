//! RetryScheduler - background re-dispatch of failed webhook events.
//!
//! Picks up rows with `status = failed`, `needs_attention = false` and a
//! passed `next_retry_at`, and sends each one back through the coordinator's
//! dispatch step. The row already exists, so the insert step is skipped.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `poll_interval` | 60s | How often to look for due events |
//! | `batch_size` | 50 | Max events to retry per poll cycle |
//!
//! ## Graceful Shutdown
//!
//! The loop listens on a `watch` channel and runs one final batch before
//! returning.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use super::ingest_webhook::{IngestionCoordinator, Redispatch, RetryGate};
use crate::domain::billing::{BillingError, Outcome};
use crate::ports::{Clock, InboxStore};

/// Configuration for the RetryScheduler.
#[derive(Debug, Clone)]
pub struct RetrySchedulerConfig {
    /// How often to poll for due events.
    pub poll_interval: Duration,

    /// Maximum events to retry per poll cycle.
    pub batch_size: u32,
}

impl Default for RetrySchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 50,
        }
    }
}

impl RetrySchedulerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }
}

/// Summary of one retry pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    /// Number of due events selected.
    pub checked: usize,
    /// Events that reached processed or ignored on this pass.
    pub processed_ids: Vec<String>,
    /// Events that failed again, including any newly flagged for attention.
    pub failed_ids: Vec<String>,
}

impl RetryReport {
    pub fn retried(&self) -> usize {
        self.processed_ids.len() + self.failed_ids.len()
    }
}

pub struct RetryScheduler {
    coordinator: Arc<IngestionCoordinator>,
    store: Arc<dyn InboxStore>,
    clock: Arc<dyn Clock>,
    config: RetrySchedulerConfig,
}

impl RetryScheduler {
    pub fn new(
        coordinator: Arc<IngestionCoordinator>,
        store: Arc<dyn InboxStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(coordinator, store, clock, RetrySchedulerConfig::default())
    }

    pub fn with_config(
        coordinator: Arc<IngestionCoordinator>,
        store: Arc<dyn InboxStore>,
        clock: Arc<dyn Clock>,
        config: RetrySchedulerConfig,
    ) -> Self {
        Self {
            coordinator,
            store,
            clock,
            config,
        }
    }

    /// Run the retry loop until the shutdown signal is received.
    ///
    /// A failed pass is logged and retried on the next tick; only the
    /// shutdown signal ends the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.run_logged().await;
                        info!("Retry scheduler stopped");
                        return;
                    }
                }

                _ = interval.tick() => {
                    self.run_logged().await;
                }
            }
        }
    }

    /// Runs one pass with the configured batch size.
    pub async fn run_once(&self) -> Result<usize, BillingError> {
        Ok(self.retry_due_events(self.config.batch_size).await?.retried())
    }

    /// Re-dispatches up to `limit` due events.
    ///
    /// A row that is no longer due by the time it is locked (another
    /// instance got there first) is counted as checked but not retried.
    pub async fn retry_due_events(&self, limit: u32) -> Result<RetryReport, BillingError> {
        let due = self.store.list_due_for_retry(self.clock.now(), limit).await?;
        let mut report = RetryReport {
            checked: due.len(),
            ..RetryReport::default()
        };

        for key in due {
            match self.coordinator.redispatch(&key, RetryGate::Due).await {
                Ok(Redispatch::Dispatched(result)) => match result.outcome {
                    Outcome::Processed | Outcome::Ignored => report.processed_ids.push(key.event_id.clone()),
                    Outcome::Failed | Outcome::DuplicateRejected => report.failed_ids.push(key.event_id.clone()),
                },
                Ok(Redispatch::NotEligible(_)) | Ok(Redispatch::NotFound) => {
                    debug!(provider = %key.provider, event_id = %key.event_id, "Retry skipped, row no longer due");
                }
                Err(e) => {
                    warn!(
                        provider = %key.provider,
                        event_id = %key.event_id,
                        error = %e,
                        "Retry attempt could not be recorded"
                    );
                    report.failed_ids.push(key.event_id.clone());
                }
            }
        }

        Ok(report)
    }

    async fn run_logged(&self) {
        match self.retry_due_events(self.config.batch_size).await {
            Ok(report) if report.checked > 0 => info!(
                checked = report.checked,
                processed = report.processed_ids.len(),
                failed = report.failed_ids.len(),
                "Retry pass finished"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Retry pass failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::clock::ManualClock;
    use crate::adapters::memory::InMemoryInboxStore;
    use crate::application::handlers::billing::IngestWebhookCommand;
    use crate::domain::billing::{RetryPolicy, Subscription, SubscriptionStatus};
    use crate::domain::foundation::{EventKey, SubscriptionKey, Timestamp};
    use serde_json::json;

    const START: i64 = 1_771_000_000;

    struct Harness {
        store: InMemoryInboxStore,
        clock: ManualClock,
        coordinator: Arc<IngestionCoordinator>,
        scheduler: RetryScheduler,
    }

    fn harness() -> Harness {
        let store = InMemoryInboxStore::new();
        let clock = ManualClock::new(Timestamp::from_unix_secs("start", START).unwrap());
        let coordinator = Arc::new(IngestionCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            RetryPolicy::default(),
        ));
        let scheduler = RetryScheduler::with_config(
            coordinator.clone(),
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            RetrySchedulerConfig::default().with_poll_interval(Duration::from_millis(10)),
        );
        Harness {
            store,
            clock,
            coordinator,
            scheduler,
        }
    }

    async fn ingest_orphan_payment(h: &Harness, event_id: &str) {
        h.coordinator
            .ingest(IngestWebhookCommand {
                key: EventKey::new("stripe", event_id).unwrap(),
                event_type: "payment.succeeded".to_string(),
                payload: json!({
                    "provider_subscription_id": "sub_missing",
                    "current_period_end": START + 86_400
                }),
                signature_timestamp: START,
                signature: "aa".to_string(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn config_builders_override_defaults() {
        let config = RetrySchedulerConfig::default()
            .with_poll_interval(Duration::from_secs(5))
            .with_batch_size(10);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 10);
    }

    #[tokio::test]
    async fn nothing_due_before_backoff_elapses() {
        let h = harness();
        ingest_orphan_payment(&h, "evt_1").await;

        let report = h.scheduler.retry_due_events(50).await.unwrap();

        assert_eq!(report, RetryReport::default());
    }

    #[tokio::test]
    async fn due_event_is_processed_once_subscription_exists() {
        let h = harness();
        ingest_orphan_payment(&h, "evt_1").await;
        h.store
            .put_subscription(Subscription::pending(
                SubscriptionKey::new("stripe", "sub_missing").unwrap(),
                None,
                h.clock.now(),
            ))
            .await;

        h.clock.advance_secs(300);
        let report = h.scheduler.retry_due_events(50).await.unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.processed_ids, vec!["evt_1".to_string()]);
        let sub = h
            .store
            .find_subscription(&SubscriptionKey::new("stripe", "sub_missing").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn deterministic_failure_reaches_attention_after_three_retries() {
        let h = harness();
        ingest_orphan_payment(&h, "evt_1").await;

        for delay in [300, 600, 1_200] {
            h.clock.advance_secs(delay);
            let report = h.scheduler.retry_due_events(50).await.unwrap();
            assert_eq!(report.failed_ids, vec!["evt_1".to_string()]);
        }

        let event = h
            .store
            .find_event(&EventKey::new("stripe", "evt_1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.attempt_count, 4);
        assert!(event.needs_attention);
        assert_eq!(event.next_retry_at, None);

        h.clock.advance_secs(86_400);
        assert_eq!(h.scheduler.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_limit_is_respected() {
        let h = harness();
        for id in ["evt_1", "evt_2", "evt_3"] {
            ingest_orphan_payment(&h, id).await;
        }
        h.clock.advance_secs(300);

        let report = h.scheduler.retry_due_events(2).await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.retried(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let h = harness();
        let (tx, rx) = watch::channel(false);

        let scheduler = h.scheduler;
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "scheduler did not stop after shutdown");
    }
}

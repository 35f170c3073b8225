//! Time-driven subscription jobs.
//!
//! Grace enforcement and period expiry feed synthetic triggers into the same
//! transition function that webhook events use. Each job locks every
//! candidate row in one transaction, so a webhook for the same subscription
//! either lands before the job reads it or after the job commits.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::domain::billing::{
    apply, BillingError, BillingTrigger, Subscription, SubscriptionStatus, Transition,
};
use crate::domain::foundation::Timestamp;
use crate::ports::{Clock, InboxStore};

/// Default grace period between `past_due` and cancellation.
pub const DEFAULT_GRACE_PERIOD_SECS: i64 = 24 * 60 * 60;

/// Result of `enforce_grace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraceReport {
    pub checked_at: Timestamp,
    /// Provider subscription ids moved to `canceled`.
    pub canceled_ids: Vec<String>,
}

/// Result of `expire_subscriptions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub checked_at: Timestamp,
    pub expired_ids: Vec<String>,
    /// Subscriptions that had `cancel_at_period_end` set.
    pub canceled_ids: Vec<String>,
}

pub struct LifecycleJobs {
    store: Arc<dyn InboxStore>,
    clock: Arc<dyn Clock>,
    grace_period_secs: i64,
}

impl LifecycleJobs {
    pub fn new(store: Arc<dyn InboxStore>, clock: Arc<dyn Clock>, grace_period_secs: i64) -> Self {
        Self {
            store,
            clock,
            grace_period_secs,
        }
    }

    /// Cancels `past_due` subscriptions whose grace period has elapsed.
    pub async fn enforce_grace(&self) -> Result<GraceReport, BillingError> {
        let now = self.clock.now();
        let trigger = BillingTrigger::GraceExpired {
            grace_period_secs: self.grace_period_secs,
        };
        let applied = self.run(SubscriptionStatus::PastDue, &trigger, now).await?;

        let report = GraceReport {
            checked_at: now,
            canceled_ids: applied.into_iter().map(|s| s.provider_subscription_id).collect(),
        };
        if !report.canceled_ids.is_empty() {
            info!(canceled = report.canceled_ids.len(), "Grace period enforced");
        }
        Ok(report)
    }

    /// Ends `active` subscriptions whose current period is over.
    pub async fn expire_subscriptions(&self) -> Result<ExpiryReport, BillingError> {
        let now = self.clock.now();
        let applied = self
            .run(SubscriptionStatus::Active, &BillingTrigger::PeriodEnded, now)
            .await?;

        let (canceled, expired): (Vec<Subscription>, Vec<Subscription>) = applied
            .into_iter()
            .partition(|s| s.status == SubscriptionStatus::Canceled);
        let report = ExpiryReport {
            checked_at: now,
            expired_ids: expired.into_iter().map(|s| s.provider_subscription_id).collect(),
            canceled_ids: canceled.into_iter().map(|s| s.provider_subscription_id).collect(),
        };
        if !report.expired_ids.is_empty() || !report.canceled_ids.is_empty() {
            info!(
                expired = report.expired_ids.len(),
                canceled = report.canceled_ids.len(),
                "Subscription periods closed"
            );
        }
        Ok(report)
    }

    async fn run(
        &self,
        status: SubscriptionStatus,
        trigger: &BillingTrigger,
        now: Timestamp,
    ) -> Result<Vec<Subscription>, BillingError> {
        let mut tx = self.store.begin().await?;
        let candidates = tx.lock_subscriptions_by_status(status).await?;

        let mut applied = Vec::new();
        for current in &candidates {
            if let Transition::Applied(next) = apply(current, trigger, now) {
                tx.update_subscription(&next).await?;
                info!(
                    provider = %next.provider,
                    subscription_id = %next.provider_subscription_id,
                    from = %current.status,
                    to = %next.status,
                    trigger = trigger.name(),
                    "Subscription transitioned"
                );
                applied.push(next);
            }
        }

        tx.commit().await?;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::clock::ManualClock;
    use crate::adapters::memory::InMemoryInboxStore;
    use crate::domain::foundation::SubscriptionKey;

    const START: i64 = 1_771_000_000;

    fn setup() -> (InMemoryInboxStore, ManualClock, LifecycleJobs) {
        let store = InMemoryInboxStore::new();
        let clock = ManualClock::new(Timestamp::from_unix_secs("start", START).unwrap());
        let jobs = LifecycleJobs::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            DEFAULT_GRACE_PERIOD_SECS,
        );
        (store, clock, jobs)
    }

    fn subscription(id: &str, status: SubscriptionStatus, now: Timestamp) -> Subscription {
        let mut sub = Subscription::pending(SubscriptionKey::new("stripe", id).unwrap(), None, now);
        sub.status = status;
        sub
    }

    async fn status_of(store: &InMemoryInboxStore, id: &str) -> Subscription {
        store
            .find_subscription(&SubscriptionKey::new("stripe", id).unwrap())
            .await
            .unwrap()
            .unwrap()
    }

    // ══════════════════════════════════════════════════════════════
    // enforce_grace
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn grace_cancels_only_elapsed_past_due() {
        let (store, clock, jobs) = setup();
        let now = clock.now();

        let mut overdue = subscription("sub_overdue", SubscriptionStatus::PastDue, now);
        overdue.past_due_since = Some(now.minus_secs(DEFAULT_GRACE_PERIOD_SECS));
        let mut recent = subscription("sub_recent", SubscriptionStatus::PastDue, now);
        recent.past_due_since = Some(now.minus_secs(60));
        store.put_subscription(overdue).await;
        store.put_subscription(recent).await;
        store
            .put_subscription(subscription("sub_active", SubscriptionStatus::Active, now))
            .await;

        let report = jobs.enforce_grace().await.unwrap();

        assert_eq!(report.checked_at, now);
        assert_eq!(report.canceled_ids, vec!["sub_overdue".to_string()]);
        let canceled = status_of(&store, "sub_overdue").await;
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
        assert!(canceled.access_revoked);
        assert_eq!(canceled.canceled_at, Some(now));
        assert_eq!(status_of(&store, "sub_recent").await.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn grace_with_nothing_past_due_is_empty() {
        let (_store, _clock, jobs) = setup();
        let report = jobs.enforce_grace().await.unwrap();
        assert!(report.canceled_ids.is_empty());
    }

    // ══════════════════════════════════════════════════════════════
    // expire_subscriptions
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn expiry_splits_expired_and_canceled() {
        let (store, clock, jobs) = setup();
        let now = clock.now();

        let mut lapsed = subscription("sub_lapsed", SubscriptionStatus::Active, now);
        lapsed.current_period_end = Some(now.minus_secs(1));
        let mut leaving = subscription("sub_leaving", SubscriptionStatus::Active, now);
        leaving.current_period_end = Some(now);
        leaving.cancel_at_period_end = true;
        let mut renewing = subscription("sub_renewing", SubscriptionStatus::Active, now);
        renewing.current_period_end = Some(now.plus_days(30));
        for sub in [lapsed, leaving, renewing] {
            store.put_subscription(sub).await;
        }

        let report = jobs.expire_subscriptions().await.unwrap();

        assert_eq!(report.expired_ids, vec!["sub_lapsed".to_string()]);
        assert_eq!(report.canceled_ids, vec!["sub_leaving".to_string()]);
        let expired = status_of(&store, "sub_lapsed").await;
        assert_eq!(expired.status, SubscriptionStatus::Expired);
        assert!(expired.access_revoked);
        assert_eq!(expired.expired_at, Some(now));
        assert_eq!(status_of(&store, "sub_renewing").await.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn expiry_skips_active_without_period_end() {
        let (store, clock, jobs) = setup();
        store
            .put_subscription(subscription("sub_open", SubscriptionStatus::Active, clock.now()))
            .await;

        let report = jobs.expire_subscriptions().await.unwrap();

        assert!(report.expired_ids.is_empty());
        assert!(report.canceled_ids.is_empty());
    }

    #[tokio::test]
    async fn failed_write_leaves_all_rows_untouched() {
        let (store, clock, jobs) = setup();
        let now = clock.now();
        let mut lapsed = subscription("sub_lapsed", SubscriptionStatus::Active, now);
        lapsed.current_period_end = Some(now.minus_secs(1));
        store.put_subscription(lapsed).await;
        store.fail_subscription_writes(true);

        assert!(jobs.expire_subscriptions().await.is_err());
        assert_eq!(status_of(&store, "sub_lapsed").await.status, SubscriptionStatus::Active);
    }
}

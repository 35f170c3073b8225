//! Subscription aggregate.
//!
//! A subscription is identified by `(provider, provider_subscription_id)`;
//! the store enforces that pair as unique. Status changes never happen
//! through direct field writes outside `transitions::apply`, which keeps
//! the governance fields consistent with the status.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{SubscriptionId, SubscriptionKey, Timestamp};

use super::SubscriptionStatus;

/// Snapshot of a subscription row.
///
/// # Invariants
///
/// - `access_revoked` is true exactly when `status` is canceled or expired
/// - `past_due_since` is set only while `status` is past due
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub provider: String,
    pub provider_subscription_id: String,
    pub provider_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
    pub past_due_since: Option<Timestamp>,
    pub canceled_at: Option<Timestamp>,
    pub expired_at: Option<Timestamp>,
    pub access_revoked: bool,
    pub current_period_end: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates a subscription awaiting its first payment.
    pub fn pending(
        key: SubscriptionKey,
        provider_customer_id: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            provider: key.provider,
            provider_subscription_id: key.provider_subscription_id,
            provider_customer_id,
            status: SubscriptionStatus::PendingActivation,
            cancel_at_period_end: false,
            past_due_since: None,
            canceled_at: None,
            expired_at: None,
            access_revoked: false,
            current_period_end: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Natural key of this subscription.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            provider: self.provider.clone(),
            provider_subscription_id: self.provider_subscription_id.clone(),
        }
    }

    /// Sets the governance flag consulted when the period ends.
    ///
    /// This does not change status, so it is allowed in every state.
    pub fn set_cancel_at_period_end(&mut self, flag: bool, now: Timestamp) {
        self.cancel_at_period_end = flag;
        self.updated_at = now;
    }

    /// Returns true if the period end has been reached at `now`.
    pub fn period_ended(&self, now: Timestamp) -> bool {
        self.current_period_end
            .map(|end| !end.is_after(&now))
            .unwrap_or(false)
    }
}

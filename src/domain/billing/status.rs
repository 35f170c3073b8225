//! Subscription status state machine.
//!
//! Every legal status change of a subscription appears exactly once in
//! `can_transition_to`. The transition function in `transitions` consults
//! this table before producing a new snapshot.

use crate::domain::foundation::{StateMachine, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created, waiting for the first successful payment.
    PendingActivation,

    /// Paid up for the current period.
    Active,

    /// A renewal invoice failed; the grace clock is running.
    PastDue,

    /// Ended by grace enforcement or by a scheduled cancellation.
    Canceled,

    /// Reached the end of its period without renewal.
    Expired,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 5] = [
        SubscriptionStatus::PendingActivation,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Canceled,
        SubscriptionStatus::Expired,
    ];

    /// Stable storage/wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::PendingActivation => "pending_activation",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Returns true if reaching this status revokes access.
    pub fn revokes_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled | SubscriptionStatus::Expired)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubscriptionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                ValidationError::invalid_format("status", format!("unknown subscription status '{}'", s))
            })
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (PendingActivation, Active)
                | (Active, PastDue)
                | (Active, Expired)
                | (Active, Canceled)
                | (PastDue, Active)
                | (PastDue, Canceled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            PendingActivation => vec![Active],
            Active => vec![PastDue, Expired, Canceled],
            PastDue => vec![Active, Canceled],
            Canceled | Expired => vec![],
        }
    }
}

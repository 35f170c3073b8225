//! Subscription transition function.
//!
//! Webhook events and time-driven jobs both reach the subscription through
//! `apply`. Jobs are modeled as synthetic triggers, so this table is the one
//! place that decides what a subscription may become.
//!
//! | From | Trigger | To |
//! |------|---------|----|
//! | pending_activation | PaymentSucceeded | active |
//! | active | PaymentFailed | past_due |
//! | past_due | PaymentSucceeded | active |
//! | past_due | GraceExpired (grace elapsed) | canceled |
//! | active, !cancel_at_period_end | PeriodEnded (period over) | expired |
//! | active, cancel_at_period_end | PeriodEnded (period over) | canceled |
//!
//! Every other pair is absorbed: the snapshot is returned unchanged as
//! `Transition::Ignored`.

use std::fmt;

use crate::domain::foundation::{StateMachine, Timestamp};

use super::{Subscription, SubscriptionStatus};

/// What happened to the subscription, from the billing model's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingTrigger {
    /// `payment.succeeded` carrying the new period end.
    PaymentSucceeded { period_end: Timestamp },

    /// `invoice.payment_failed`; the period end is only used for staleness.
    PaymentFailed { period_end: Option<Timestamp> },

    /// The grace enforcement job looked at this subscription.
    GraceExpired { grace_period_secs: i64 },

    /// The expiry job looked at this subscription.
    PeriodEnded,
}

impl BillingTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            BillingTrigger::PaymentSucceeded { .. } => "payment.succeeded",
            BillingTrigger::PaymentFailed { .. } => "invoice.payment_failed",
            BillingTrigger::GraceExpired { .. } => "enforce_grace",
            BillingTrigger::PeriodEnded => "expire_subscriptions",
        }
    }

    fn period_end(&self) -> Option<Timestamp> {
        match self {
            BillingTrigger::PaymentSucceeded { period_end } => Some(*period_end),
            BillingTrigger::PaymentFailed { period_end } => *period_end,
            BillingTrigger::GraceExpired { .. } | BillingTrigger::PeriodEnded => None,
        }
    }
}

/// Why a trigger left the subscription untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event's period end is older than the stored one.
    StaleEvent,

    /// The (status, trigger) pair is not in the transition table.
    NoTransition {
        status: SubscriptionStatus,
        trigger: &'static str,
    },

    /// A job trigger whose time condition has not been met.
    NotYetDue,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::StaleEvent => write!(f, "stale event ignored"),
            IgnoreReason::NoTransition { status, trigger } => {
                write!(f, "no transition for {} in state {}", trigger, status)
            }
            IgnoreReason::NotYetDue => write!(f, "not yet due"),
        }
    }
}

/// Result of applying a trigger to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied(Subscription),
    Ignored(IgnoreReason),
}

/// Applies `trigger` to `current` at `now`.
///
/// Pure: the caller persists `Transition::Applied` snapshots.
pub fn apply(current: &Subscription, trigger: &BillingTrigger, now: Timestamp) -> Transition {
    use SubscriptionStatus::*;

    if let (Some(incoming), Some(stored)) = (trigger.period_end(), current.current_period_end) {
        if incoming.is_before(&stored) {
            return Transition::Ignored(IgnoreReason::StaleEvent);
        }
    }

    let target = match (current.status, trigger) {
        (PendingActivation | PastDue, BillingTrigger::PaymentSucceeded { .. }) => Active,
        (Active, BillingTrigger::PaymentFailed { .. }) => PastDue,
        (PastDue, BillingTrigger::GraceExpired { grace_period_secs }) => {
            let elapsed = current
                .past_due_since
                .map(|since| !since.plus_secs(*grace_period_secs).is_after(&now))
                .unwrap_or(false);
            if !elapsed {
                return Transition::Ignored(IgnoreReason::NotYetDue);
            }
            Canceled
        }
        (Active, BillingTrigger::PeriodEnded) => {
            if !current.period_ended(now) {
                return Transition::Ignored(IgnoreReason::NotYetDue);
            }
            if current.cancel_at_period_end {
                Canceled
            } else {
                Expired
            }
        }
        (status, trigger) => {
            return Transition::Ignored(IgnoreReason::NoTransition {
                status,
                trigger: trigger.name(),
            })
        }
    };

    if !current.status.can_transition_to(&target) {
        return Transition::Ignored(IgnoreReason::NoTransition {
            status: current.status,
            trigger: trigger.name(),
        });
    }

    let mut next = current.clone();
    next.status = target;
    next.updated_at = now;

    match target {
        Active => {
            next.past_due_since = None;
            if let Some(period_end) = trigger.period_end() {
                next.current_period_end = Some(period_end);
            }
        }
        PastDue => next.past_due_since = Some(now),
        Canceled => {
            next.canceled_at = Some(now);
            next.access_revoked = true;
        }
        Expired => {
            next.expired_at = Some(now);
            next.access_revoked = true;
        }
        PendingActivation => {}
    }

    Transition::Applied(next)
}

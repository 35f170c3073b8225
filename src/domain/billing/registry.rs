//! Event type registry.
//!
//! Maps an inbound `event_type` onto a handler. Dispatch is a closed match
//! over `EventType`; unknown strings land in `EventType::Unmodeled` and are
//! absorbed as ignored rather than failing.

use serde_json::Value;

use crate::domain::foundation::{SubscriptionKey, Timestamp};

use super::errors::HandlerFailure;
use super::payload::PaymentPayload;
use super::transitions::{self, BillingTrigger, Transition};
use super::Subscription;

/// Event types the billing model understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    PaymentSucceeded,
    InvoicePaymentFailed,
    Unmodeled(String),
}

impl EventType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "payment.succeeded" => EventType::PaymentSucceeded,
            "invoice.payment_failed" => EventType::InvoicePaymentFailed,
            other => EventType::Unmodeled(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::PaymentSucceeded => "payment.succeeded",
            EventType::InvoicePaymentFailed => "invoice.payment_failed",
            EventType::Unmodeled(raw) => raw,
        }
    }
}

/// A routed event: which subscription it targets and what it means there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInput {
    pub subscription: SubscriptionKey,
    pub trigger: BillingTrigger,
}

/// Resolves the handler input for an event.
///
/// Returns `Ok(None)` when no handler is registered for the event type.
pub fn route(
    provider: &str,
    event_type: &EventType,
    payload: &Value,
) -> Result<Option<HandlerInput>, HandlerFailure> {
    let (payload, trigger) = match event_type {
        EventType::PaymentSucceeded => {
            let payload = PaymentPayload::from_value(payload)?;
            let period_end = payload.period_end()?.ok_or_else(|| {
                HandlerFailure::invalid_payload("current_period_end is required")
            })?;
            (payload, BillingTrigger::PaymentSucceeded { period_end })
        }
        EventType::InvoicePaymentFailed => {
            let payload = PaymentPayload::from_value(payload)?;
            let period_end = payload.period_end()?;
            (payload, BillingTrigger::PaymentFailed { period_end })
        }
        EventType::Unmodeled(_) => return Ok(None),
    };

    let subscription = SubscriptionKey::new(provider, payload.provider_subscription_id)
        .map_err(|e| HandlerFailure::invalid_payload(e.to_string()))?;

    Ok(Some(HandlerInput {
        subscription,
        trigger,
    }))
}

/// The handler itself: snapshot plus input to transition or failure.
///
/// A missing snapshot is a domain failure so that the event is retried;
/// the subscription may be created by a later delivery.
pub fn handle(
    snapshot: Option<&Subscription>,
    input: &HandlerInput,
    now: Timestamp,
) -> Result<Transition, HandlerFailure> {
    let current = snapshot
        .ok_or_else(|| HandlerFailure::SubscriptionNotFound(input.subscription.clone()))?;
    Ok(transitions::apply(current, &input.trigger, now))
}

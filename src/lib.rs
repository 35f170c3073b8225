//! Billing Inbox - idempotent intake of payment provider webhooks
//!
//! Verifies signed provider events, records each one exactly once in an
//! inbox keyed by `(provider, event_id)`, and applies it to subscription
//! state through a closed state machine. Failed events are retried with
//! exponential backoff until they are flagged for manual attention.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

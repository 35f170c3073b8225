//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (timestamps, keys, errors)
//! - `billing` - Subscription state machine, webhook inbox records, verification

pub mod billing;
pub mod foundation;

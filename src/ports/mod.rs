//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `InboxStore` / `InboxTransaction` - webhook events and subscriptions
//! - `Clock` - current time
//! - `RateLimiter` - per-caller request budget at the webhook edge

mod clock;
mod inbox_store;
mod rate_limiter;

pub use clock::Clock;
pub use inbox_store::{InboxStore, InboxTransaction, InsertResult};
pub use rate_limiter::{
    RateLimitDenied, RateLimitError, RateLimitKey, RateLimitResult, RateLimitStatus, RateLimiter,
};

//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the application to external systems:
//! - `clock` - wall clock and a settable test clock
//! - `memory` - in-process inbox store
//! - `postgres` - PostgreSQL inbox store
//! - `rate_limiter` - in-memory and Redis rate limiters
//! - `http` - axum routes for webhooks, jobs and subscriptions

pub mod clock;
pub mod http;
pub mod memory;
pub mod postgres;
pub mod rate_limiter;

pub use clock::{ManualClock, SystemClock};
pub use memory::InMemoryInboxStore;
pub use postgres::PostgresInboxStore;
pub use rate_limiter::{InMemoryRateLimiter, RedisRateLimiter};

//! Rate limiter adapters.
//!
//! Implementations of the RateLimiter port for different backends.
//!
//! ## Available Adapters
//!
//! - `InMemoryRateLimiter` - per-process counters for tests and single-instance use
//! - `RedisRateLimiter` - shared counters for multi-instance deployments
//!
//! ## Usage
//!
//! ```ignore
//! use billing_inbox::adapters::rate_limiter::InMemoryRateLimiter;
//!
//! let limiter = InMemoryRateLimiter::new(120, Arc::new(SystemClock));
//! let limiter = RedisRateLimiter::new(conn, 120);
//! ```

mod in_memory;
mod redis;

pub use in_memory::{InMemoryRateLimiter, WINDOW_SECS};
pub use self::redis::RedisRateLimiter;

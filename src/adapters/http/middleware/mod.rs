//! HTTP middleware for axum.
//!
//! - `edge_guard` - IP allowlist and per-provider rate limiting for webhooks

pub mod edge_guard;

pub use edge_guard::{edge_guard_middleware, EdgeGuardState, IpAllowlist, TrustedProxies};

//! Clock port - the single source of "now" for the inbox.
//!
//! Verification, backoff scheduling and lifecycle jobs all compare against
//! the current time; routing them through this port lets tests pin it.

use crate::domain::foundation::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

//! PostgreSQL adapters - Database implementations for repository ports.
//!
//! - `PostgresInboxStore` - webhook events and subscriptions, transactional

mod inbox_store;

pub use inbox_store::{PostgresInboxStore, PostgresInboxTransaction};

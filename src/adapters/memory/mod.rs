//! In-memory adapters.

mod inbox_store;

pub use inbox_store::InMemoryInboxStore;

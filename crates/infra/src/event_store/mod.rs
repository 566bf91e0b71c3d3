//! Append-only event store boundary.
//!
//! Streams are keyed by name (see `streamroot_core::stream_name`); every
//! backend enforces stream contiguity before accepting a write.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::{ConnectError, PostgresEventStore};
pub use r#trait::{
    EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch, verify_contiguous,
};

//! `streamroot-core`: event-sourced aggregate building blocks.
//!
//! This crate contains **pure domain** primitives (no storage concerns):
//! identifiers, the aggregate root and its transition hook, stream naming and
//! the stream contiguity rule.

pub mod aggregate;
pub mod container;
pub mod error;
pub mod id;
pub mod name;
pub mod recorder;
pub mod stream;

pub use aggregate::{AggregateRoot, EventSourced, Lifecycle, RehydrateFn, VersionedEvent};
pub use container::{DependencyContainer, HydrationProperties};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, IdentifierFactory, UuidIdentifierFactory};
pub use name::{
    STREAM_NAME_SEPARATOR, aggregate_name, is_valid_aggregate_name, resolve_name, stream_name,
};
pub use recorder::{NullRecorder, Recorder, TracingRecorder};
pub use stream::{
    ContiguityViolation, FIRST_VERSION, INITIAL_VERSION, check_contiguity, next_version,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use streamroot_core::{AggregateId, ContiguityViolation, check_contiguity, next_version};
use std::sync::Arc;

/// An event ready to be appended to a stream.
///
/// The writer assigns `version` (the aggregate already knows it); the store
/// only verifies it. `payload` is opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,

    /// Position this event claims in the stream.
    pub version: u64,

    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// An event durably stored in a stream.
///
/// ## Versions
///
/// Versions are:
/// - **Contiguous**: `FIRST_VERSION, FIRST_VERSION + 1, ...` with no gaps
/// - **Unique**: no two events of a stream share a version
/// - **Immutable**: once stored, an event never moves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub stream_name: String,
    pub aggregate_id: AggregateId,

    /// Position in the stream.
    pub version: u64,

    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub(crate) fn from_uncommitted(stream_name: &str, event: UncommittedEvent) -> Self {
        Self {
            event_id: event.event_id,
            stream_name: stream_name.to_string(),
            aggregate_id: event.aggregate_id,
            version: event.version,
            event_type: event.event_type,
            schema_version: event.schema_version,
            occurred_at: event.occurred_at,
            payload: event.payload,
        }
    }
}

/// Event store operation error.
///
/// ## Error Categories
///
/// - **VersionConflict**: the append would break stream contiguity; reload and retry the
///   business operation
/// - **InvalidAppend**: the batch itself is malformed (caller bug, not retryable)
/// - **Transient**: backend/I-O failure; retryable by the caller, never retried here
/// - **Corrupted**: stored data could not be decoded
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("{store}: version conflict on stream '{stream}': {violation}")]
    VersionConflict {
        store: &'static str,
        stream: String,
        violation: ContiguityViolation,
    },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("corrupted stream data: {0}")]
    Corrupted(String),
}

impl EventStoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn violation(&self) -> Option<ContiguityViolation> {
        match self {
            Self::VersionConflict { violation, .. } => Some(*violation),
            _ => None,
        }
    }
}

/// Run the contiguity check and attach store/stream context to a failure.
pub fn verify_contiguous(
    store: &'static str,
    stream: &str,
    latest_stored: Option<u64>,
    next: u64,
) -> Result<(), EventStoreError> {
    check_contiguity(latest_stored, next).map_err(|violation| EventStoreError::VersionConflict {
        store,
        stream: stream.to_string(),
        violation,
    })
}

/// Validate a batch against the writer's own expectation, before touching storage.
///
/// Returns the version of the first event.
pub fn validate_batch(
    expected_latest: Option<u64>,
    events: &[UncommittedEvent],
) -> Result<u64, EventStoreError> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend("no events to append".to_string()));
    };

    let Some(claimed) = next_version(expected_latest) else {
        return Err(EventStoreError::InvalidAppend(format!(
            "expected latest {expected_latest:?} leaves no room for another version"
        )));
    };
    if first.version != claimed {
        return Err(EventStoreError::InvalidAppend(format!(
            "first event has version {}, but expected latest {expected_latest:?} implies {claimed}",
            first.version
        )));
    }

    let aggregate_id = &first.aggregate_id;
    let mut previous = first.version;
    for (idx, e) in events.iter().enumerate().skip(1) {
        if &e.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if next_version(Some(previous)) != Some(e.version) {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch versions are not contiguous at index {idx} (previous {previous}, found {})",
                e.version
            )));
        }
        previous = e.version;
    }

    Ok(first.version)
}

/// Append-only event store, one stream per aggregate instance.
///
/// ## Append Semantics
///
/// `append()`:
/// - Validates the batch (non-empty, contiguous, consistent with `expected_latest`)
/// - Checks contiguity of the first event against the version *actually stored*
/// - Persists all events atomically (all or none become visible)
/// - Returns the new latest version
///
/// Concurrent writers racing for the same version: exactly one wins, the
/// others get `VersionConflict` (collision).
///
/// ## Read Semantics
///
/// `read_stream()` returns events in version order; a stream never written is
/// an empty vector, not an error.
pub trait EventStore: Send + Sync {
    /// Backend name used in error messages.
    fn store_type(&self) -> &'static str;

    fn append(
        &self,
        stream_name: &str,
        expected_latest: Option<u64>,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError>;

    fn read_stream(&self, stream_name: &str) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn store_type(&self) -> &'static str {
        (**self).store_type()
    }

    fn append(
        &self,
        stream_name: &str,
        expected_latest: Option<u64>,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        (**self).append(stream_name, expected_latest, events)
    }

    fn read_stream(&self, stream_name: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).read_stream(stream_name)
    }
}

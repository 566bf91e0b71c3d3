use std::collections::HashMap;
use std::sync::RwLock;

use super::r#trait::{
    EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch, verify_contiguous,
};

/// In-memory append-only event store.
///
/// Intended for tests/dev. The write lock is the conditional-append primitive:
/// the stored latest version is read, checked and extended under one lock.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<String, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn latest_version(stream: &[StoredEvent]) -> Option<u64> {
        stream.last().map(|e| e.version)
    }
}

impl EventStore for InMemoryEventStore {
    fn store_type(&self) -> &'static str {
        "InMemoryEventStore"
    }

    fn append(
        &self,
        stream_name: &str,
        expected_latest: Option<u64>,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        let first_version = validate_batch(expected_latest, &events)?;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Transient("lock poisoned".to_string()))?;

        let stored_latest = streams
            .get(stream_name)
            .and_then(|stream| Self::latest_version(stream));

        if let Err(err) =
            verify_contiguous(self.store_type(), stream_name, stored_latest, first_version)
        {
            tracing::warn!(stream = stream_name, ?stored_latest, first_version, "append rejected");
            return Err(err);
        }

        // Everything validated; the push below cannot fail halfway.
        let stream = streams.entry(stream_name.to_string()).or_default();
        let count = events.len();
        stream.extend(
            events
                .into_iter()
                .map(|e| StoredEvent::from_uncommitted(stream_name, e)),
        );

        let latest = Self::latest_version(stream).unwrap_or(first_version);
        tracing::debug!(stream = stream_name, count, latest, "events appended");
        Ok(latest)
    }

    fn read_stream(&self, stream_name: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Transient("lock poisoned".to_string()))?;

        Ok(streams.get(stream_name).cloned().unwrap_or_default())
    }
}

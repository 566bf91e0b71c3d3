//! Load, replay and commit event-sourced aggregates.
//!
//! ```text
//! load:  read stream → rehydrate via registry → replay (is_reconstituting = true)
//! save:  encode uncommitted → append(expected = committed version) → clear on success
//! ```
//!
//! There is no retry here. On a version conflict the caller reloads, re-runs
//! its business operation against the new state and saves again.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use streamroot_core::{
    AggregateId, AggregateRoot, DependencyContainer, DomainError, EventSourced,
    HydrationProperties, VersionedEvent, stream_name,
};
use streamroot_events::{DomainEvent, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::registry::{RegistryError, RehydrationRegistry};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An event could not be encoded for, or decoded from, the store.
    #[error("event codec failure: {0}")]
    Codec(String),

    /// The store returned an event that does not belong to the requested stream.
    #[error("stream mismatch: {0}")]
    StreamMismatch(String),
}

impl RepositoryError {
    /// Reload-and-retry territory.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_version_conflict())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

/// Generic persistence for any registered aggregate type.
#[derive(Debug)]
pub struct AggregateRepository<S> {
    store: S,
    registry: RehydrationRegistry,
    container: DependencyContainer,
}

impl<S> AggregateRepository<S> {
    pub fn new(store: S, registry: RehydrationRegistry, container: DependencyContainer) -> Self {
        Self {
            store,
            registry,
            container,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &RehydrationRegistry {
        &self.registry
    }

    pub fn container(&self) -> &DependencyContainer {
        &self.container
    }
}

impl<S: EventStore> AggregateRepository<S> {
    /// Create a fresh aggregate using the container's recorder and identifier factory.
    pub fn create<A: EventSourced>(
        &self,
        identifier: Option<AggregateId>,
    ) -> Result<AggregateRoot<A>, RepositoryError> {
        let root = AggregateRoot::new(
            std::sync::Arc::clone(self.container.recorder()),
            self.container.identifier_factory().as_ref(),
            identifier,
        )?;
        Ok(root)
    }

    /// Rebuild an aggregate from its full stream.
    ///
    /// A stream that was never written yields the empty shell at
    /// `FIRST_VERSION - 1`; whether that means "not found" is the caller's call.
    pub fn load<A>(
        &self,
        id: &AggregateId,
        properties: &HydrationProperties,
    ) -> Result<AggregateRoot<A>, RepositoryError>
    where
        A: EventSourced,
        A::Event: DomainEvent + DeserializeOwned,
    {
        let factory = self.registry.factory::<A>()?;
        let history = self.read_events::<A>(id)?;

        let mut root = factory(id.clone(), &self.container, properties)?;
        root.load_history(history.into_iter().map(EventEnvelope::into_versioned))?;

        tracing::debug!(aggregate_id = %id, version = root.version(), "aggregate rehydrated");
        Ok(root)
    }

    /// Typed view of an aggregate's stream, in version order.
    pub fn read_events<A>(
        &self,
        id: &AggregateId,
    ) -> Result<Vec<EventEnvelope<A::Event>>, RepositoryError>
    where
        A: EventSourced,
        A::Event: DeserializeOwned,
    {
        let stream = stream_name::<A>(id);
        let history = self.store.read_stream(&stream)?;
        decode_history(&stream, id, history)
    }

    /// Persist uncommitted events; returns the latest persisted version.
    ///
    /// Only registered types are written, so every stream prefix has passed
    /// the registry's name checks. The events stay queued on the aggregate if
    /// the append fails.
    pub fn save<A>(
        &self,
        aggregate: &mut AggregateRoot<A>,
    ) -> Result<Option<u64>, RepositoryError>
    where
        A: EventSourced,
        A::Event: DomainEvent + Serialize,
    {
        self.registry.factory::<A>()?;
        if !aggregate.has_uncommitted_events() {
            return Ok(aggregate.committed_version());
        }

        let stream = stream_name::<A>(aggregate.id());
        let expected = aggregate.committed_version();
        let batch = encode_uncommitted(aggregate.id(), aggregate.uncommitted_events())?;

        let latest = match self.store.append(&stream, expected, batch) {
            Ok(latest) => latest,
            Err(err) => {
                if err.is_version_conflict() {
                    tracing::warn!(
                        stream = %stream,
                        ?expected,
                        error = %err,
                        "version conflict on save"
                    );
                }
                return Err(err.into());
            }
        };

        let committed = aggregate.take_uncommitted_events();
        let summary = format!("committed {} event(s) up to version {latest}", committed.len());
        self.container.recorder().audit(aggregate.id(), &summary);
        tracing::debug!(stream = %stream, latest, "aggregate saved");
        Ok(Some(latest))
    }
}

fn encode_uncommitted<E>(
    aggregate_id: &AggregateId,
    events: &[VersionedEvent<E>],
) -> Result<Vec<UncommittedEvent>, RepositoryError>
where
    E: DomainEvent + Serialize,
{
    events
        .iter()
        .map(|versioned| {
            let payload = serde_json::to_value(&versioned.event).map_err(|e| {
                RepositoryError::Codec(format!(
                    "failed to encode {} at version {}: {e}",
                    versioned.event.event_type(),
                    versioned.version
                ))
            })?;
            Ok(UncommittedEvent {
                event_id: Uuid::now_v7(),
                aggregate_id: aggregate_id.clone(),
                version: versioned.version,
                event_type: versioned.event.event_type().to_string(),
                schema_version: versioned.event.schema_version(),
                occurred_at: versioned.event.occurred_at(),
                payload,
            })
        })
        .collect()
}

fn decode_history<E>(
    stream: &str,
    id: &AggregateId,
    history: Vec<StoredEvent>,
) -> Result<Vec<EventEnvelope<E>>, RepositoryError>
where
    E: DeserializeOwned,
{
    history
        .into_iter()
        .map(|stored| {
            // A buggy backend must not leak another stream's events into this aggregate.
            if &stored.aggregate_id != id || stored.stream_name != stream {
                return Err(RepositoryError::StreamMismatch(format!(
                    "event {} (stream '{}', aggregate '{}') loaded for stream '{stream}'",
                    stored.event_id, stored.stream_name, stored.aggregate_id
                )));
            }
            let event = serde_json::from_value(stored.payload).map_err(|e| {
                RepositoryError::Codec(format!(
                    "failed to decode {} at version {}: {e}",
                    stored.event_type, stored.version
                ))
            })?;
            Ok(EventEnvelope::new(
                stored.event_id,
                stored.aggregate_id,
                stored.version,
                stored.occurred_at,
                event,
            ))
        })
        .collect()
}

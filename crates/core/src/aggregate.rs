//! Event-sourced aggregate roots.
//!
//! An aggregate's state is derived only from the ordered events applied to it.
//! Live mutation and replay go through the same [`AggregateRoot::apply_event`]
//! path, so the hook cannot behave differently between the two.

use std::sync::Arc;

use crate::container::{DependencyContainer, HydrationProperties};
use crate::error::{DomainError, DomainResult};
use crate::id::{AggregateId, IdentifierFactory};
use crate::recorder::Recorder;
use crate::stream::INITIAL_VERSION;

/// State and transition hook of a concrete aggregate.
///
/// Implementations hold only the domain fields; identity, version and
/// uncommitted events are tracked by [`AggregateRoot`].
pub trait EventSourced: Clone + Default + Send + core::fmt::Debug + 'static {
    /// The events this aggregate produces and replays.
    type Event: Clone + core::fmt::Debug + Send + 'static;

    /// Explicit stream name, overriding the one derived from the type name.
    const ENTITY_NAME: Option<&'static str> = None;

    /// Apply one event to the state, or reject it.
    ///
    /// Called for both live application and replay. A rejection discards any
    /// partial changes made here.
    fn on_state_changed(
        &mut self,
        event: &Self::Event,
        is_reconstituting: bool,
    ) -> DomainResult<()>;

    /// Initial state for a rehydrated aggregate, before its stream is replayed.
    fn rehydrated(
        _container: &DependencyContainer,
        _properties: &HydrationProperties,
    ) -> DomainResult<Self> {
        Ok(Self::default())
    }
}

/// Factory used by generic infrastructure to rebuild an aggregate of a known type.
pub type RehydrateFn<S> =
    fn(AggregateId, &DependencyContainer, &HydrationProperties) -> DomainResult<AggregateRoot<S>>;

/// An event paired with the stream version it occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEvent<E> {
    pub version: u64,
    pub event: E,
}

/// Whether an aggregate has applied anything yet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// No event applied; version is `FIRST_VERSION - 1`.
    Fresh,
    /// At least one event applied.
    Loaded,
}

/// Aggregate root: identity, version and pending changes around an [`EventSourced`] state.
///
/// Not thread-safe by contract: one unit of work owns an instance at a time.
#[derive(Debug, Clone)]
pub struct AggregateRoot<S: EventSourced> {
    id: AggregateId,
    version: u64,
    uncommitted: Vec<VersionedEvent<S::Event>>,
    state: S,
    recorder: Arc<dyn Recorder>,
}

impl<S: EventSourced> AggregateRoot<S> {
    /// Create a brand-new aggregate.
    ///
    /// Mints an identifier unless one is supplied; a supplied identifier must
    /// be accepted by the factory.
    pub fn new(
        recorder: Arc<dyn Recorder>,
        identifier_factory: &dyn IdentifierFactory,
        identifier: Option<AggregateId>,
    ) -> DomainResult<Self> {
        let id = match identifier {
            Some(id) => {
                if !identifier_factory.is_valid(&id) {
                    return Err(DomainError::invalid_identifier(format!(
                        "identifier '{id}' rejected by identifier factory"
                    )));
                }
                id
            }
            None => identifier_factory.create()?,
        };

        Ok(Self::with_state(id, S::default(), recorder))
    }

    /// Build an empty shell for `id`; the caller replays the stream into it.
    pub fn rehydrate(
        id: AggregateId,
        container: &DependencyContainer,
        properties: &HydrationProperties,
    ) -> DomainResult<Self> {
        let state = S::rehydrated(container, properties)?;
        Ok(Self::with_state(id, state, Arc::clone(container.recorder())))
    }

    fn with_state(id: AggregateId, state: S, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            id,
            version: INITIAL_VERSION,
            uncommitted: Vec::new(),
            state,
            recorder,
        }
    }

    /// The sole mutation entry point.
    ///
    /// On success the version advances by one and, for live events, the event
    /// is queued as uncommitted. On failure nothing changes.
    pub fn apply_event(&mut self, event: S::Event, is_reconstituting: bool) -> DomainResult<u64> {
        let next = self
            .version
            .checked_add(1)
            .ok_or(DomainError::VersionOverflow(self.version))?;

        let mut candidate = self.state.clone();
        if let Err(err) = candidate.on_state_changed(&event, is_reconstituting) {
            self.recorder
                .trace(&format!("aggregate {} rejected event at version {next}: {err}", self.id));
            return Err(err);
        }

        self.state = candidate;
        self.version = next;
        if !is_reconstituting {
            self.recorder
                .trace(&format!("aggregate {} raised event version {next}", self.id));
            self.uncommitted.push(VersionedEvent {
                version: next,
                event,
            });
        }
        Ok(next)
    }

    /// Apply a new (live) event.
    pub fn raise(&mut self, event: S::Event) -> DomainResult<u64> {
        self.apply_event(event, false)
    }

    /// Replay persisted events in order.
    ///
    /// Each event must carry exactly the next version. Stops at the first failure.
    pub fn load_history<I>(&mut self, history: I) -> DomainResult<()>
    where
        I: IntoIterator<Item = VersionedEvent<S::Event>>,
    {
        for stored in history {
            let expected = self.version.saturating_add(1);
            if stored.version != expected {
                return Err(DomainError::EventOutOfOrder {
                    expected,
                    actual: stored.version,
                });
            }
            self.apply_event(stored.event, true)?;
        }
        Ok(())
    }

    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Count of events applied since `FIRST_VERSION - 1` (stored + uncommitted).
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.version == INITIAL_VERSION {
            Lifecycle::Fresh
        } else {
            Lifecycle::Loaded
        }
    }

    /// Latest version known to be persisted, `None` if nothing is.
    pub fn committed_version(&self) -> Option<u64> {
        let pending = u64::try_from(self.uncommitted.len()).unwrap_or(u64::MAX);
        let committed = self.version.saturating_sub(pending);
        (committed != INITIAL_VERSION).then_some(committed)
    }

    pub fn uncommitted_events(&self) -> &[VersionedEvent<S::Event>] {
        &self.uncommitted
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Drain pending events once they are durably stored.
    pub fn take_uncommitted_events(&mut self) -> Vec<VersionedEvent<S::Event>> {
        std::mem::take(&mut self.uncommitted)
    }
}

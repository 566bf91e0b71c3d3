//! Collaborators and seed data used while rehydrating aggregates.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{IdentifierFactory, UuidIdentifierFactory};
use crate::recorder::{Recorder, TracingRecorder};

/// The fixed set of collaborators generic rehydration can hand to an aggregate.
///
/// Borrowed for the duration of construction only; aggregates clone the `Arc`s
/// they need to keep.
#[derive(Debug, Clone)]
pub struct DependencyContainer {
    recorder: Arc<dyn Recorder>,
    identifier_factory: Arc<dyn IdentifierFactory>,
}

impl DependencyContainer {
    pub fn new(
        recorder: Arc<dyn Recorder>,
        identifier_factory: Arc<dyn IdentifierFactory>,
    ) -> Self {
        Self {
            recorder,
            identifier_factory,
        }
    }

    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }

    pub fn identifier_factory(&self) -> &Arc<dyn IdentifierFactory> {
        &self.identifier_factory
    }
}

impl Default for DependencyContainer {
    /// `tracing`-backed recorder and an unprefixed UUIDv7 identifier factory.
    fn default() -> Self {
        Self::new(Arc::new(TracingRecorder), Arc::new(UuidIdentifierFactory::new()))
    }
}

/// Named values captured from a snapshot or projection, used to seed fields
/// that event replay alone cannot recover.
///
/// Encoding is owned by whoever persisted them; here they are plain JSON values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydrationProperties {
    values: BTreeMap<String, JsonValue>,
}

impl HydrationProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Properties are read-only once handed to a constructor.
    pub fn with(mut self, name: impl Into<String>, value: impl Serialize) -> DomainResult<Self> {
        let value = serde_json::to_value(value).map_err(|e| {
            DomainError::validation(format!("hydration property not encodable: {e}"))
        })?;
        self.values.insert(name.into(), value);
        Ok(self)
    }

    /// Typed lookup. Missing names are `Ok(None)`; values of the wrong shape are errors.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> DomainResult<Option<T>> {
        let Some(raw) = self.values.get(name) else {
            return Ok(None);
        };
        T::deserialize(raw).map(Some).map_err(|e| {
            DomainError::validation(format!(
                "hydration property '{name}' has unexpected shape: {e}"
            ))
        })
    }

    pub fn get_raw(&self, name: &str) -> Option<&JsonValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, JsonValue)> for HydrationProperties {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

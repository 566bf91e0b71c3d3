//! Rehydration factories, registered per aggregate type at startup.
//!
//! Generic persistence code asks the registry how to rebuild an aggregate
//! instead of knowing each constructor. Entries are keyed by the resolved
//! aggregate name, which is also the stream-name prefix, so two types that
//! would share streams cannot both be registered.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use thiserror::Error;

use streamroot_core::{
    AggregateRoot, EventSourced, RehydrateFn, aggregate_name, is_valid_aggregate_name,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("aggregate name '{name}' is already registered by another type")]
    NameCollision { name: String },

    #[error("no rehydration factory registered for aggregate '{0}'")]
    NotRegistered(String),

    /// Empty, or contains the stream-name separator and could share streams with another type.
    #[error("aggregate name '{name}' cannot key event streams")]
    InvalidName { name: String },
}

struct Entry {
    type_id: TypeId,
    factory: Box<dyn Any + Send + Sync>,
}

/// Aggregate name → rehydration factory.
#[derive(Default)]
pub struct RehydrationRegistry {
    entries: HashMap<String, Entry>,
}

impl core::fmt::Debug for RehydrationRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RehydrationRegistry")
            .field("aggregates", &self.names())
            .finish()
    }
}

impl RehydrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `S` with its default factory (`AggregateRoot::rehydrate`).
    pub fn register<S: EventSourced>(&mut self) -> Result<(), RegistryError> {
        self.register_with::<S>(AggregateRoot::<S>::rehydrate)
    }

    /// Register `S` with a custom factory. Re-registering the same type replaces it.
    pub fn register_with<S: EventSourced>(
        &mut self,
        factory: RehydrateFn<S>,
    ) -> Result<(), RegistryError> {
        let name = aggregate_name::<S>();
        if !is_valid_aggregate_name(&name) {
            return Err(RegistryError::InvalidName { name });
        }
        let type_id = TypeId::of::<S>();

        if let Some(existing) = self.entries.get(&name) {
            if existing.type_id != type_id {
                return Err(RegistryError::NameCollision { name });
            }
        }

        tracing::debug!(aggregate = %name, "registered rehydration factory");
        self.entries.insert(
            name,
            Entry {
                type_id,
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    /// Factory for `S`.
    pub fn factory<S: EventSourced>(&self) -> Result<RehydrateFn<S>, RegistryError> {
        let name = aggregate_name::<S>();
        self.entries
            .get(&name)
            .filter(|entry| entry.type_id == TypeId::of::<S>())
            .and_then(|entry| entry.factory.downcast_ref::<RehydrateFn<S>>())
            .copied()
            .ok_or(RegistryError::NotRegistered(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered aggregate names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

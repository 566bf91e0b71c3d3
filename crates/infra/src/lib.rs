//! Infrastructure layer: event stores, rehydration and configuration.

pub mod config;
pub mod event_store;
pub mod registry;
pub mod repository;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, StoreBackend, StoreConfig, build_store};
pub use registry::{RegistryError, RehydrationRegistry};
pub use repository::{AggregateRepository, RepositoryError};

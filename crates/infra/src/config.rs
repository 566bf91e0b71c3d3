//! Event store configuration, read from the environment.

use std::sync::Arc;

use thiserror::Error;

use crate::event_store::{EventStore, InMemoryEventStore};

pub const ENV_EVENT_STORE: &str = "STREAMROOT_EVENT_STORE";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_PG_MAX_CONNECTIONS: &str = "STREAMROOT_PG_MAX_CONNECTIONS";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown event store backend '{0}' (expected 'memory' or 'postgres')")]
    UnknownBackend(String),

    #[error("{0} is required for the postgres event store")]
    MissingDatabaseUrl(&'static str),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("backend '{0}' is not compiled in (enable the corresponding feature)")]
    BackendUnavailable(&'static str),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl StoreConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match lookup(ENV_EVENT_STORE).as_deref().map(str::trim) {
            None | Some("") | Some("memory") => StoreBackend::Memory,
            Some("postgres") => StoreBackend::Postgres,
            Some(other) => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let database_url = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty());
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl(ENV_DATABASE_URL));
        }

        let max_connections = match lookup(ENV_PG_MAX_CONNECTIONS) {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_PG_MAX_CONNECTIONS,
                        value: raw,
                    });
                }
            },
        };

        Ok(Self {
            backend,
            database_url,
            max_connections,
        })
    }
}

/// Build the configured store.
///
/// The postgres backend needs an async connect; use
/// `PostgresEventStore::connect` for it (feature `postgres`).
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn EventStore>, ConfigError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
        StoreBackend::Postgres => Err(ConfigError::BackendUnavailable("postgres")),
    }
}

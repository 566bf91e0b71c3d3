//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures raised while constructing or
/// mutating aggregates. Storage failures live in the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An explicit identifier was malformed or rejected by the identifier factory.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The state-transition hook rejected an event (live or replay).
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A replayed event did not carry the next expected version.
    #[error("event out of order: expected version {expected}, found {actual}")]
    EventOutOfOrder { expected: u64, actual: u64 },

    /// The aggregate version cannot advance any further.
    #[error("version overflow at {0}")]
    VersionOverflow(u64),
}

impl DomainError {
    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }
}

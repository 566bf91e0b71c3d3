//! Aggregate identifiers and the factory that mints them.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Longest identifier accepted by [`AggregateId::parse`].
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Identifier of an aggregate root.
///
/// String-backed so identifiers minted by other systems (prefixed ids, legacy
/// keys) can be carried unchanged. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AggregateId(String);

impl AggregateId {
    /// Parse and validate an identifier.
    ///
    /// Accepts 1..=100 characters of ASCII alphanumerics, `_` and `-`.
    pub fn parse(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::invalid_identifier("identifier cannot be empty"));
        }
        if value.len() > MAX_IDENTIFIER_LEN {
            return Err(DomainError::invalid_identifier(format!(
                "identifier longer than {MAX_IDENTIFIER_LEN} characters"
            )));
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(DomainError::invalid_identifier(format!(
                "identifier '{value}' contains invalid character {bad:?}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AggregateId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AggregateId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AggregateId> for String {
    fn from(value: AggregateId) -> Self {
        value.0
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Mints and validates aggregate identifiers.
pub trait IdentifierFactory: Send + Sync + core::fmt::Debug {
    /// Create a new, globally unique identifier.
    fn create(&self) -> DomainResult<AggregateId>;

    /// Whether an externally supplied identifier is acceptable to this factory.
    fn is_valid(&self, id: &AggregateId) -> bool;
}

/// UUIDv7-backed identifier factory (time-ordered).
///
/// With a prefix, identifiers look like `order_01900c3e7b2c7f5e9a3b4c5d6e7f8091`
/// and only identifiers carrying that prefix are considered valid.
#[derive(Debug, Clone, Default)]
pub struct UuidIdentifierFactory {
    prefix: Option<String>,
}

impl UuidIdentifierFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory minting `"{prefix}_{uuid}"` identifiers.
    pub fn with_prefix(prefix: impl Into<String>) -> DomainResult<Self> {
        let prefix = prefix.into();
        // The prefix must itself be a legal identifier fragment.
        AggregateId::parse(prefix.as_str())?;
        Ok(Self {
            prefix: Some(prefix),
        })
    }
}

impl IdentifierFactory for UuidIdentifierFactory {
    fn create(&self) -> DomainResult<AggregateId> {
        let raw = Uuid::now_v7().simple().to_string();
        match &self.prefix {
            Some(prefix) => AggregateId::parse(format!("{prefix}_{raw}")),
            None => AggregateId::parse(raw),
        }
    }

    fn is_valid(&self, id: &AggregateId) -> bool {
        match &self.prefix {
            Some(prefix) => id
                .as_str()
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|rest| !rest.is_empty()),
            None => true,
        }
    }
}

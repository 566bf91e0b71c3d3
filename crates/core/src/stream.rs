//! Event stream versioning and the contiguity check.
//!
//! Stream versions start at [`FIRST_VERSION`] and must grow by exactly one per
//! event, with no gaps and no repeats. [`check_contiguity`] is the whole of the
//! optimistic concurrency mechanism: writers race to append the next version
//! and exactly one wins; everyone else is told why they lost.

use thiserror::Error;

/// Version carried by the first event of every stream.
pub const FIRST_VERSION: u64 = 1;

/// Version of an aggregate that has not applied any event yet.
pub const INITIAL_VERSION: u64 = FIRST_VERSION - 1;

/// Why an append would break stream contiguity.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum ContiguityViolation {
    /// The stream has no history but the writer is not starting at the first version.
    #[error("stream has no events, but next version is {next} (expected {FIRST_VERSION})")]
    StreamReset { next: u64 },

    /// The next version skips past the expected one.
    #[error("missing versions: expected next version {expected}, found {next}")]
    MissingVersions { expected: u64, next: u64 },

    /// The next version is at or behind a version already stored.
    #[error("version collision: version {next} already exists (latest stored is {latest})")]
    VersionCollision { next: u64, latest: u64 },
}

/// Verify that `next` is the version immediately after `latest_stored`.
///
/// `latest_stored` is `None` when the stream has never been written.
pub fn check_contiguity(latest_stored: Option<u64>, next: u64) -> Result<(), ContiguityViolation> {
    let Some(latest) = latest_stored else {
        if next != FIRST_VERSION {
            return Err(ContiguityViolation::StreamReset { next });
        }
        return Ok(());
    };

    // Nothing can follow u64::MAX, so any candidate collides with it.
    let Some(expected) = next_version(Some(latest)) else {
        return Err(ContiguityViolation::VersionCollision { next, latest });
    };
    if next > expected {
        return Err(ContiguityViolation::MissingVersions { expected, next });
    }
    if next < expected {
        return Err(ContiguityViolation::VersionCollision { next, latest });
    }
    Ok(())
}

/// The version a writer must use for its next event given what it last saw.
///
/// `None` once the version space is exhausted.
pub fn next_version(latest: Option<u64>) -> Option<u64> {
    match latest {
        None => Some(FIRST_VERSION),
        Some(v) => v.checked_add(1),
    }
}

//! Tracing and logging setup shared by every binary and test harness.

/// Initialize process-wide logging with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

pub use tracing::{LogFormat, init_with};

/// Tracing configuration (filters, formats).
pub mod tracing;

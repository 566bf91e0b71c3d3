//! Diagnostic sink handed to aggregates.

use crate::id::AggregateId;

/// Receives diagnostics from domain code without tying it to a logging backend.
pub trait Recorder: Send + Sync + core::fmt::Debug {
    /// Low-level diagnostic trace.
    fn trace(&self, message: &str);

    /// Record a business-significant action against an aggregate.
    fn audit(&self, aggregate_id: &AggregateId, action: &str);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl Recorder for TracingRecorder {
    fn trace(&self, message: &str) {
        tracing::debug!(target: "streamroot::recorder", "{message}");
    }

    fn audit(&self, aggregate_id: &AggregateId, action: &str) {
        tracing::info!(
            target: "streamroot::audit",
            aggregate_id = %aggregate_id,
            action,
            "audit"
        );
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn trace(&self, _message: &str) {}

    fn audit(&self, _aggregate_id: &AggregateId, _action: &str) {}
}

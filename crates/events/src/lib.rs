//! Domain events and their envelopes.

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::DomainEvent;

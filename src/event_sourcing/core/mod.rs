// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// GENERIC, reusable event sourcing infrastructure: no account-specific code
// lives here.
//
// ============================================================================

pub mod aggregate;
pub mod event;

// Re-export core types for convenience
pub use aggregate::{Aggregate, AggregateRoot};
pub use event::{DomainEvent, EventEnvelope, serialize_event, deserialize_event};

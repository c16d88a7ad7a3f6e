// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================
//
// `EventStore` is the only entry point callers use. Backends provide the
// storage primitives underneath it.
//
// ============================================================================

pub mod backend;
pub mod event_store;
pub mod memory;
pub mod scylla;

pub use backend::{StreamBackend, StreamOperation, TransactionSupport};
pub use event_store::EventStore;
pub use memory::InMemoryBackend;
pub use self::scylla::ScyllaBackend;

// ============================================================================
// Transactional Outbox
// ============================================================================
//
// Committed domain events are staged here and delivered to the message bus
// by the publisher, either immediately or by the supervisor's retry loop.
//
// ============================================================================

pub mod postgres;
pub mod publisher;
pub mod record;
pub mod repository;
pub mod supervisor;
pub mod transport;

pub use postgres::PgOutboxRepository;
pub use publisher::{DeliveryOutcome, OutboxConfig, OutboxPublisher, ProcessingReport};
pub use record::{OutboxRecord, OutboxStatus};
pub use repository::{InMemoryOutboxRepository, OutboxRepository};
pub use supervisor::{OutboxSupervisor, ProcessNow, Shutdown};
pub use transport::{DeliveryError, KafkaTransport, MessageTransport};

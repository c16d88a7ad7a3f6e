// ============================================================================
// Coin Ledger
// ============================================================================
//
// Event-sourced account ledger:
// - event_sourcing: aggregate engine and event store (Scylla or in-memory)
// - domain::account: the account aggregate and its command/query handlers
// - outbox: staged delivery of committed events to Kafka/Redpanda
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod error;
pub mod event_sourcing;
pub mod metrics;
pub mod outbox;
pub mod utils;

pub use crate::config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};

use crate::domain::account::AccountError;
use crate::outbox::DeliveryError;

// ============================================================================
// Ledger Error Taxonomy
// ============================================================================
//
// Shared by the aggregate engine, the event store, the command handlers and
// the outbox. Validation and concurrency failures are handed straight back
// to the caller; nothing in the core retries them.
//
// ============================================================================

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Validation(#[from] AccountError),

    #[error("Event belongs to stream {actual}, expected {expected}")]
    StreamMismatch { expected: String, actual: String },

    #[error("Concurrency conflict on stream {stream_id}: expected version {expected}, current version {actual}")]
    ConcurrencyConflict {
        stream_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Transaction failed and was rolled back (streams restored: {rolled_back:?}): {source}")]
    Transaction {
        #[source]
        source: Box<LedgerError>,
        rolled_back: Vec<String>,
    },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        LedgerError::InvalidArgument(msg.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        LedgerError::Storage(err.to_string())
    }

    /// True when the caller may reload the aggregate and try again.
    pub fn is_concurrency_conflict(&self) -> bool {
        match self {
            LedgerError::ConcurrencyConflict { .. } => true,
            LedgerError::Transaction { source, .. } => source.is_concurrency_conflict(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation(_))
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument(_) => "invalid_argument",
            LedgerError::Validation(_) => "validation",
            LedgerError::StreamMismatch { .. } => "stream_mismatch",
            LedgerError::ConcurrencyConflict { .. } => "concurrency_conflict",
            LedgerError::Transaction { .. } => "transaction",
            LedgerError::Delivery(_) => "delivery",
            LedgerError::Serialization(_) => "serialization",
            LedgerError::Storage(_) => "storage",
        }
    }
}

impl From<scylla::errors::ExecutionError> for LedgerError {
    fn from(err: scylla::errors::ExecutionError) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

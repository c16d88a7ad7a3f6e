use async_trait::async_trait;

use crate::error::{LedgerError, LedgerResult};
use crate::event_sourcing::core::EventEnvelope;

// ============================================================================
// Stream Backend - Storage Primitives Behind the Event Store
// ============================================================================
//
// A backend knows how to read a stream, append to it under a version guard,
// and undo an append. Whether it can also commit several streams as one
// unit is reported through `transaction_support`, and the event store picks
// its multi-stream strategy from that answer.
//
// ============================================================================

/// How a backend can make multi-stream commits atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionSupport {
    /// `append_batch` commits every stream or none.
    Native,
    /// Streams are written one by one and rolled back on failure.
    Compensating,
}

/// Events destined for one stream inside a multi-stream commit.
#[derive(Debug, Clone)]
pub struct StreamOperation {
    pub stream_id: String,
    pub events: Vec<EventEnvelope>,
}

impl StreamOperation {
    pub fn new(stream_id: impl Into<String>, events: Vec<EventEnvelope>) -> Self {
        Self {
            stream_id: stream_id.into(),
            events,
        }
    }

    /// Stream head the store must hold for these events to be accepted.
    pub fn expected_version(&self) -> i64 {
        self.events
            .first()
            .map(|e| e.sequence_number - 1)
            .unwrap_or(0)
    }

    pub fn last_sequence(&self) -> i64 {
        self.events
            .last()
            .map(|e| e.sequence_number)
            .unwrap_or(0)
    }
}

#[async_trait]
pub trait StreamBackend: Send + Sync {
    fn transaction_support(&self) -> TransactionSupport;

    /// All events of a stream in ascending sequence order.
    async fn read_stream(&self, stream_id: &str) -> LedgerResult<Vec<EventEnvelope>>;

    /// Highest persisted sequence, 0 for a stream that never existed.
    async fn current_sequence(&self, stream_id: &str) -> LedgerResult<i64>;

    /// Append only if the stream head still equals `expected`, otherwise
    /// fail with `ConcurrencyConflict` and write nothing.
    async fn append(&self, stream_id: &str, expected: i64, events: &[EventEnvelope]) -> LedgerResult<()>;

    /// Commit several streams as one unit. Only called for `Native` backends.
    async fn append_batch(&self, _operations: &[StreamOperation]) -> LedgerResult<()> {
        Err(LedgerError::Storage(
            "backend does not support multi-stream transactions".to_string(),
        ))
    }

    /// Drop every event after `keep_through`, restoring an earlier head.
    async fn truncate_after(&self, stream_id: &str, keep_through: i64) -> LedgerResult<()>;

    async fn stream_ids(&self) -> LedgerResult<Vec<String>>;
}

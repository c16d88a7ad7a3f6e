use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::error::{LedgerError, LedgerResult};
use crate::event_sourcing::core::EventEnvelope;
use super::backend::{StreamBackend, StreamOperation, TransactionSupport};

// ============================================================================
// In-Memory Stream Backend
// ============================================================================
//
// Streams live in one map behind a single lock, so holding the write lock
// across a whole batch gives real all-or-nothing commits. Used by tests and
// by local runs without a database.
//
// ============================================================================

#[derive(Default)]
struct Streams {
    events: HashMap<String, Vec<EventEnvelope>>,
    // streams whose next append fails with a storage error
    faults: HashSet<String>,
}

impl Streams {
    fn head(&self, stream_id: &str) -> i64 {
        self.events
            .get(stream_id)
            .and_then(|events| events.last())
            .map(|e| e.sequence_number)
            .unwrap_or(0)
    }

    fn check_head(&self, stream_id: &str, expected: i64) -> LedgerResult<()> {
        let actual = self.head(stream_id);
        if actual != expected {
            return Err(LedgerError::ConcurrencyConflict {
                stream_id: stream_id.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn take_fault(&mut self, stream_id: &str) -> LedgerResult<()> {
        if self.faults.remove(stream_id) {
            return Err(LedgerError::Storage(format!(
                "injected write failure for stream {}",
                stream_id
            )));
        }
        Ok(())
    }
}

pub struct InMemoryBackend {
    streams: RwLock<Streams>,
    support: TransactionSupport,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(Streams::default()),
            support: TransactionSupport::Native,
        }
    }

    /// Behave like a store without transactions, forcing the event store
    /// onto its compensating path.
    pub fn without_transactions() -> Self {
        Self {
            streams: RwLock::new(Streams::default()),
            support: TransactionSupport::Compensating,
        }
    }

    /// Make the next write to `stream_id` fail with a storage error.
    pub async fn fail_next_append_for(&self, stream_id: &str) {
        self.streams.write().await.faults.insert(stream_id.to_string());
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamBackend for InMemoryBackend {
    fn transaction_support(&self) -> TransactionSupport {
        self.support
    }

    async fn read_stream(&self, stream_id: &str) -> LedgerResult<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams.events.get(stream_id).cloned().unwrap_or_default())
    }

    async fn current_sequence(&self, stream_id: &str) -> LedgerResult<i64> {
        Ok(self.streams.read().await.head(stream_id))
    }

    async fn append(&self, stream_id: &str, expected: i64, events: &[EventEnvelope]) -> LedgerResult<()> {
        let mut streams = self.streams.write().await;
        streams.check_head(stream_id, expected)?;
        streams.take_fault(stream_id)?;

        streams
            .events
            .entry(stream_id.to_string())
            .or_default()
            .extend(events.iter().cloned());
        Ok(())
    }

    async fn append_batch(&self, operations: &[StreamOperation]) -> LedgerResult<()> {
        if self.support != TransactionSupport::Native {
            return Err(LedgerError::Storage(
                "transactions disabled for this backend".to_string(),
            ));
        }

        let mut streams = self.streams.write().await;

        // every guard is evaluated before the first write
        for op in operations {
            streams.check_head(&op.stream_id, op.expected_version())?;
        }
        for op in operations {
            streams.take_fault(&op.stream_id)?;
        }

        for op in operations {
            streams
                .events
                .entry(op.stream_id.clone())
                .or_default()
                .extend(op.events.iter().cloned());
        }
        Ok(())
    }

    async fn truncate_after(&self, stream_id: &str, keep_through: i64) -> LedgerResult<()> {
        let mut streams = self.streams.write().await;
        let now_empty = match streams.events.get_mut(stream_id) {
            Some(events) => {
                events.retain(|e| e.sequence_number <= keep_through);
                events.is_empty()
            }
            None => false,
        };
        if now_empty {
            streams.events.remove(stream_id);
        }
        Ok(())
    }

    async fn stream_ids(&self) -> LedgerResult<Vec<String>> {
        let streams = self.streams.read().await;
        let mut ids: Vec<String> = streams.events.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn events(stream: &str, from: i64, count: i64) -> Vec<EventEnvelope> {
        (from..from + count)
            .map(|seq| EventEnvelope::new(stream, seq, "CoinsAdded", json!({ "amount": 1 })))
            .collect()
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let backend = InMemoryBackend::new();
        backend.append("s-1", 0, &events("s-1", 1, 2)).await.unwrap();

        assert_eq!(backend.current_sequence("s-1").await.unwrap(), 2);
        assert_eq!(backend.read_stream("s-1").await.unwrap().len(), 2);
        assert!(backend.read_stream("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_append_rejected() {
        let backend = InMemoryBackend::new();
        backend.append("s-1", 0, &events("s-1", 1, 1)).await.unwrap();

        let err = backend.append("s-1", 0, &events("s-1", 1, 1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrencyConflict { expected: 0, actual: 1, .. }));
        assert_eq!(backend.read_stream("s-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_fault_leaves_everything_untouched() {
        let backend = InMemoryBackend::new();
        backend.fail_next_append_for("s-2").await;

        let ops = vec![
            StreamOperation::new("s-1", events("s-1", 1, 1)),
            StreamOperation::new("s-2", events("s-2", 1, 1)),
        ];
        assert!(backend.append_batch(&ops).await.is_err());

        assert!(backend.stream_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncate_restores_head() {
        let backend = InMemoryBackend::without_transactions();
        backend.append("s-1", 0, &events("s-1", 1, 3)).await.unwrap();

        backend.truncate_after("s-1", 1).await.unwrap();
        assert_eq!(backend.current_sequence("s-1").await.unwrap(), 1);

        backend.truncate_after("s-1", 0).await.unwrap();
        assert!(backend.stream_ids().await.unwrap().is_empty());
    }
}

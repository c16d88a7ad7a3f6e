use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{LedgerError, LedgerResult};
use crate::event_sourcing::core::{Aggregate, AggregateRoot, EventEnvelope};
use super::backend::{StreamBackend, StreamOperation, TransactionSupport};
use super::memory::InMemoryBackend;

// ============================================================================
// Event Store - Repository for Event Streams
// ============================================================================
//
// Responsibilities:
// 1. Load stream history in sequence order
// 2. Append under optimistic concurrency (expected head = first seq - 1)
// 3. Commit several streams as one unit, natively when the backend can,
//    otherwise by writing stream by stream and rolling back on failure
//
// Conflicts are reported, never retried here. The command handler decides
// whether to reload and try again.
//
// ============================================================================

pub struct EventStore {
    backend: Arc<dyn StreamBackend>,
}

impl EventStore {
    pub fn new(backend: Arc<dyn StreamBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    pub fn transaction_support(&self) -> TransactionSupport {
        self.backend.transaction_support()
    }

    /// Events of a stream, oldest first. Unknown streams yield an empty list.
    pub async fn get_events(&self, stream_id: &str) -> LedgerResult<Vec<EventEnvelope>> {
        ensure_stream_id(stream_id)?;
        self.backend.read_stream(stream_id).await
    }

    pub async fn current_version(&self, stream_id: &str) -> LedgerResult<i64> {
        ensure_stream_id(stream_id)?;
        self.backend.current_sequence(stream_id).await
    }

    pub async fn stream_exists(&self, stream_id: &str) -> LedgerResult<bool> {
        Ok(self.current_version(stream_id).await? > 0)
    }

    pub async fn stream_ids(&self) -> LedgerResult<Vec<String>> {
        self.backend.stream_ids().await
    }

    /// Append events to one stream. Returns the new stream version.
    pub async fn save_events(&self, stream_id: &str, events: &[EventEnvelope]) -> LedgerResult<i64> {
        ensure_stream_id(stream_id)?;
        if events.is_empty() {
            return self.backend.current_sequence(stream_id).await;
        }
        validate_batch(stream_id, events)?;

        let expected = events[0].sequence_number - 1;
        self.backend.append(stream_id, expected, events).await?;

        let new_version = expected + events.len() as i64;
        tracing::info!(
            stream_id = %stream_id,
            new_version = new_version,
            event_count = events.len(),
            "Appended events to event store"
        );
        Ok(new_version)
    }

    /// Commit events for several distinct streams as one unit.
    pub async fn save_transaction(&self, operations: &[StreamOperation]) -> LedgerResult<()> {
        let operations: Vec<&StreamOperation> = operations
            .iter()
            .filter(|op| !op.events.is_empty())
            .collect();

        let mut seen = HashSet::new();
        for op in &operations {
            ensure_stream_id(&op.stream_id)?;
            validate_batch(&op.stream_id, &op.events)?;
            if !seen.insert(op.stream_id.as_str()) {
                return Err(LedgerError::invalid_argument(format!(
                    "stream {} appears twice in one transaction",
                    op.stream_id
                )));
            }
        }

        match operations.len() {
            0 => return Ok(()),
            1 => {
                let op = operations[0];
                return self
                    .backend
                    .append(&op.stream_id, op.expected_version(), &op.events)
                    .await;
            }
            _ => {}
        }

        match self.backend.transaction_support() {
            TransactionSupport::Native => {
                let owned: Vec<StreamOperation> = operations.into_iter().cloned().collect();
                self.backend.append_batch(&owned).await?;
                tracing::info!(stream_count = owned.len(), "Committed multi-stream transaction");
                Ok(())
            }
            TransactionSupport::Compensating => self.commit_compensating(&operations).await,
        }
    }

    /// Best-effort atomicity for backends without transactions: readers may
    /// briefly observe the first streams written before a rollback lands.
    async fn commit_compensating(&self, operations: &[&StreamOperation]) -> LedgerResult<()> {
        // snapshot every head first; a stale guard fails before any write
        let mut snapshots = Vec::with_capacity(operations.len());
        for op in operations {
            let actual = self.backend.current_sequence(&op.stream_id).await?;
            let expected = op.expected_version();
            if actual != expected {
                return Err(LedgerError::ConcurrencyConflict {
                    stream_id: op.stream_id.clone(),
                    expected,
                    actual,
                });
            }
            snapshots.push(actual);
        }

        let mut written: Vec<(&str, i64)> = Vec::with_capacity(operations.len());
        for (op, snapshot) in operations.iter().zip(snapshots) {
            if let Err(err) = self.backend.append(&op.stream_id, snapshot, &op.events).await {
                tracing::warn!(
                    stream_id = %op.stream_id,
                    error = %err,
                    written = written.len(),
                    "Multi-stream commit failed, rolling back"
                );
                let rolled_back = self.roll_back(&written).await;
                return Err(LedgerError::Transaction {
                    source: Box::new(err),
                    rolled_back,
                });
            }
            written.push((op.stream_id.as_str(), snapshot));
        }

        tracing::info!(stream_count = operations.len(), "Committed multi-stream transaction (compensating)");
        Ok(())
    }

    async fn roll_back(&self, written: &[(&str, i64)]) -> Vec<String> {
        let mut restored = Vec::with_capacity(written.len());
        for (stream_id, snapshot) in written.iter().rev() {
            match self.backend.truncate_after(stream_id, *snapshot).await {
                Ok(()) => restored.push(stream_id.to_string()),
                Err(err) => {
                    tracing::error!(
                        stream_id = %stream_id,
                        restore_to = snapshot,
                        error = %err,
                        "Failed to roll back stream, manual repair needed"
                    );
                }
            }
        }
        restored
    }

    /// Replay a stream into a fresh aggregate. A missing stream gives an
    /// aggregate at version 0.
    pub async fn load_aggregate<A: Aggregate>(&self, stream_id: &str) -> LedgerResult<AggregateRoot<A>> {
        let events = self.get_events(stream_id).await?;
        AggregateRoot::rehydrate(stream_id, &events)
    }

    /// Persist an aggregate's buffered events and mark them committed.
    pub async fn save_aggregate<A: Aggregate>(&self, aggregate: &mut AggregateRoot<A>) -> LedgerResult<i64> {
        if !aggregate.has_uncommitted() {
            return Ok(aggregate.version());
        }
        let stream_id = aggregate.id().to_string();
        let version = self.save_events(&stream_id, aggregate.uncommitted()).await?;
        aggregate.mark_committed();
        Ok(version)
    }
}

fn ensure_stream_id(stream_id: &str) -> LedgerResult<()> {
    if stream_id.trim().is_empty() {
        return Err(LedgerError::invalid_argument("stream id must not be empty"));
    }
    Ok(())
}

/// Events must all belong to the stream and carry contiguous sequences
/// starting above zero.
fn validate_batch(stream_id: &str, events: &[EventEnvelope]) -> LedgerResult<()> {
    let first = match events.first() {
        Some(first) => first.sequence_number,
        None => return Ok(()),
    };
    if first < 1 {
        return Err(LedgerError::invalid_argument(format!(
            "sequence numbers start at 1, got {}",
            first
        )));
    }

    for (offset, event) in events.iter().enumerate() {
        if event.stream_id != stream_id {
            return Err(LedgerError::StreamMismatch {
                expected: stream_id.to_string(),
                actual: event.stream_id.clone(),
            });
        }
        if event.sequence_number != first + offset as i64 {
            return Err(LedgerError::invalid_argument(format!(
                "non-contiguous sequence {} at position {} of stream {}",
                event.sequence_number, offset, stream_id
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use super::record::{OutboxRecord, OutboxStatus};

// ============================================================================
// Outbox Repository
// ============================================================================
//
// Durable staging area for events awaiting delivery. `claim` is the only
// way into PROCESSING and must be atomic, so two workers never deliver the
// same record at once. Callers act on the row `claim` returns, never on an
// earlier `find_pending` snapshot.
//
// ============================================================================

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn save(&self, record: &OutboxRecord) -> LedgerResult<()>;

    async fn save_many(&self, records: &[OutboxRecord]) -> LedgerResult<()>;

    /// PENDING or FAILED records with `retry_count < max_retries` and
    /// `next_attempt_at <= now`, oldest first.
    async fn find_pending(&self, limit: usize, max_retries: i32, now: DateTime<Utc>) -> LedgerResult<Vec<OutboxRecord>>;

    /// Move a record that is still eligible (same rule as `find_pending`)
    /// to PROCESSING and return it as stored. `None` when another worker
    /// claimed or resolved it first, or its next attempt is not due.
    async fn claim(&self, id: Uuid, max_retries: i32, now: DateTime<Utc>) -> LedgerResult<Option<OutboxRecord>>;

    async fn mark_published(&self, id: Uuid) -> LedgerResult<()>;

    /// Record a failed attempt: FAILED, retry_count + 1, retry after
    /// `next_attempt_at`.
    async fn mark_failed(&self, id: Uuid, error: &str, next_attempt_at: DateTime<Utc>) -> LedgerResult<()>;

    /// Record the final failed attempt: DEAD_LETTER, retry_count + 1.
    async fn mark_dead_letter(&self, id: Uuid, error: &str) -> LedgerResult<()>;

    async fn find_by_stream(&self, stream_id: &str) -> LedgerResult<Vec<OutboxRecord>>;

    async fn find_dead_letters(&self, limit: usize) -> LedgerResult<Vec<OutboxRecord>>;

    /// Put a dead letter back in the pending pool with a fresh retry budget.
    async fn requeue_dead_letter(&self, id: Uuid) -> LedgerResult<bool>;

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64>;

    async fn get(&self, id: Uuid) -> LedgerResult<Option<OutboxRecord>>;
}

// ============================================================================
// In-Memory Repository
// ============================================================================

/// Keeps records in insertion order behind one lock.
#[derive(Default)]
pub struct InMemoryOutboxRepository {
    records: Mutex<Vec<OutboxRecord>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

fn find_mut<'a>(records: &'a mut [OutboxRecord], id: Uuid) -> LedgerResult<&'a mut OutboxRecord> {
    records
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| LedgerError::Storage(format!("outbox record {} not found", id)))
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn save(&self, record: &OutboxRecord) -> LedgerResult<()> {
        self.save_many(std::slice::from_ref(record)).await
    }

    async fn save_many(&self, records: &[OutboxRecord]) -> LedgerResult<()> {
        let mut stored = self.records.lock().await;
        if let Some(dup) = records.iter().find(|r| stored.iter().any(|s| s.id == r.id)) {
            return Err(LedgerError::Storage(format!("outbox record {} already exists", dup.id)));
        }
        stored.extend(records.iter().cloned());
        Ok(())
    }

    async fn find_pending(&self, limit: usize, max_retries: i32, now: DateTime<Utc>) -> LedgerResult<Vec<OutboxRecord>> {
        let stored = self.records.lock().await;
        let mut due: Vec<OutboxRecord> = stored
            .iter()
            .filter(|r| r.is_eligible(max_retries, now))
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal timestamps
        due.sort_by_key(|r| r.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(&self, id: Uuid, max_retries: i32, now: DateTime<Utc>) -> LedgerResult<Option<OutboxRecord>> {
        let mut stored = self.records.lock().await;
        let record = find_mut(&mut stored, id)?;
        if !record.is_eligible(max_retries, now) {
            return Ok(None);
        }
        record.status = OutboxStatus::Processing;
        record.processed_at = Some(now);
        Ok(Some(record.clone()))
    }

    async fn mark_published(&self, id: Uuid) -> LedgerResult<()> {
        let mut stored = self.records.lock().await;
        let record = find_mut(&mut stored, id)?;
        record.status = OutboxStatus::Published;
        record.published_at = Some(Utc::now());
        record.last_error = None;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, next_attempt_at: DateTime<Utc>) -> LedgerResult<()> {
        let mut stored = self.records.lock().await;
        let record = find_mut(&mut stored, id)?;
        record.status = OutboxStatus::Failed;
        record.retry_count += 1;
        record.last_error = Some(error.to_string());
        record.next_attempt_at = next_attempt_at;
        Ok(())
    }

    async fn mark_dead_letter(&self, id: Uuid, error: &str) -> LedgerResult<()> {
        let mut stored = self.records.lock().await;
        let record = find_mut(&mut stored, id)?;
        record.status = OutboxStatus::DeadLetter;
        record.retry_count += 1;
        record.last_error = Some(error.to_string());
        Ok(())
    }

    async fn find_by_stream(&self, stream_id: &str) -> LedgerResult<Vec<OutboxRecord>> {
        let stored = self.records.lock().await;
        let mut records: Vec<OutboxRecord> = stored
            .iter()
            .filter(|r| r.stream_id == stream_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence_number);
        Ok(records)
    }

    async fn find_dead_letters(&self, limit: usize) -> LedgerResult<Vec<OutboxRecord>> {
        let stored = self.records.lock().await;
        Ok(stored
            .iter()
            .filter(|r| r.status == OutboxStatus::DeadLetter)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn requeue_dead_letter(&self, id: Uuid) -> LedgerResult<bool> {
        let mut stored = self.records.lock().await;
        let record = find_mut(&mut stored, id)?;
        if record.status != OutboxStatus::DeadLetter {
            return Ok(false);
        }
        record.status = OutboxStatus::Pending;
        record.retry_count = 0;
        record.next_attempt_at = Utc::now();
        Ok(true)
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        let mut stored = self.records.lock().await;
        let before = stored.len();
        stored.retain(|r| {
            !(r.status == OutboxStatus::Published && r.published_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - stored.len()) as u64)
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Option<OutboxRecord>> {
        let stored = self.records.lock().await;
        Ok(stored.iter().find(|r| r.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::EventEnvelope;
    use serde_json::json;

    fn record(stream: &str, seq: i64) -> OutboxRecord {
        OutboxRecord::from_event(&EventEnvelope::new(stream, seq, "CoinsAdded", json!({ "amount": 1 })))
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let repo = InMemoryOutboxRepository::new();
        let r = record("acc-1", 1);
        repo.save(&r).await.unwrap();

        let claimed = repo.claim(r.id, 5, Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.status, OutboxStatus::Processing);
        assert!(repo.claim(r.id, 5, Utc::now()).await.unwrap().is_none());
        assert_eq!(repo.get(r.id).await.unwrap().unwrap().status, OutboxStatus::Processing);
    }

    #[tokio::test]
    async fn test_claim_rechecks_schedule_and_ceiling() {
        let repo = InMemoryOutboxRepository::new();
        let r = record("acc-1", 1);
        repo.save(&r).await.unwrap();

        repo.claim(r.id, 5, Utc::now()).await.unwrap().unwrap();
        repo.mark_failed(r.id, "timeout", Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        // FAILED but not yet due
        assert!(repo.claim(r.id, 5, Utc::now()).await.unwrap().is_none());

        let later = Utc::now() + chrono::Duration::hours(2);
        // retry budget already spent
        assert!(repo.claim(r.id, 1, later).await.unwrap().is_none());

        let claimed = repo.claim(r.id, 5, later).await.unwrap().unwrap();
        assert_eq!(claimed.retry_count, 1);
    }

    #[tokio::test]
    async fn test_find_pending_respects_ceiling_and_schedule() {
        let repo = InMemoryOutboxRepository::new();
        let due = record("acc-1", 1);
        let later = record("acc-1", 2);
        let exhausted = record("acc-1", 3);
        repo.save_many(&[due.clone(), later.clone(), exhausted.clone()]).await.unwrap();

        repo.claim(later.id, 3, Utc::now()).await.unwrap();
        repo.mark_failed(later.id, "timeout", Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        for _ in 0..3 {
            repo.claim(exhausted.id, 3, Utc::now()).await.unwrap();
            repo.mark_failed(exhausted.id, "timeout", Utc::now()).await.unwrap();
        }

        let pending = repo.find_pending(10, 3, Utc::now()).await.unwrap();
        let ids: Vec<Uuid> = pending.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![due.id]);
    }

    #[tokio::test]
    async fn test_dead_letter_requeue() {
        let repo = InMemoryOutboxRepository::new();
        let r = record("acc-1", 1);
        repo.save(&r).await.unwrap();

        repo.claim(r.id, 5, Utc::now()).await.unwrap();
        repo.mark_dead_letter(r.id, "rejected").await.unwrap();
        assert_eq!(repo.find_dead_letters(10).await.unwrap().len(), 1);
        assert!(repo.claim(r.id, 5, Utc::now()).await.unwrap().is_none());

        assert!(repo.requeue_dead_letter(r.id).await.unwrap());
        let requeued = repo.get(r.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, OutboxStatus::Pending);
        assert_eq!(requeued.retry_count, 0);
        assert!(!repo.requeue_dead_letter(r.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_published_before_cutoff() {
        let repo = InMemoryOutboxRepository::new();
        let published = record("acc-1", 1);
        let pending = record("acc-1", 2);
        repo.save_many(&[published.clone(), pending.clone()]).await.unwrap();
        repo.claim(published.id, 5, Utc::now()).await.unwrap();
        repo.mark_published(published.id).await.unwrap();

        let deleted = repo
            .delete_published_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(repo.get(published.id).await.unwrap().is_none());
        assert!(repo.get(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_save_rejected() {
        let repo = InMemoryOutboxRepository::new();
        let r = record("acc-1", 1);
        repo.save(&r).await.unwrap();

        assert!(repo.save(&r).await.is_err());
        assert_eq!(repo.len().await, 1);
    }
}

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::event_sourcing::core::EventEnvelope;
use crate::metrics::Metrics;
use crate::utils::RetryConfig;
use super::record::OutboxRecord;
use super::repository::OutboxRepository;
use super::transport::{DeliveryError, MessageTransport};

// ============================================================================
// Outbox Publisher
// ============================================================================
//
// Staging always happens before delivery, so a crash or a broker outage
// never loses an event: whatever is not PUBLISHED is picked up again by
// `process_pending`.
//
// Dead-letter rule: a failed attempt raises retry_count to retry_count + 1.
// Reaching `max_retries` parks the record as DEAD_LETTER, anything below
// schedules the next attempt `retry.delay_for_attempt(retry_count)` out.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub batch_size: usize,
    pub max_retries: i32,
    pub retry: RetryConfig,
    pub processing_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 5,
            retry: RetryConfig::outbox(),
            processing_interval: Duration::from_millis(5_000),
            cleanup_interval: Duration::from_millis(3_600_000),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingReport {
    pub selected: usize,
    pub published: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    /// Claimed by another worker, or bookkeeping failed.
    pub skipped: usize,
}

/// How one delivery attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Published,
    Retrying(DeliveryError),
    DeadLettered(DeliveryError),
}

pub struct OutboxPublisher {
    repository: Arc<dyn OutboxRepository>,
    transport: Arc<dyn MessageTransport>,
    config: OutboxConfig,
    metrics: Option<Arc<Metrics>>,
}

impl OutboxPublisher {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        transport: Arc<dyn MessageTransport>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            repository,
            transport,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn OutboxRepository> {
        &self.repository
    }

    /// Stage one event and try to deliver it right away.
    ///
    /// Staging errors are returned as is. A failed delivery returns
    /// `LedgerError::Delivery` while the record stays in the outbox for retry.
    pub async fn publish(&self, event: &EventEnvelope) -> LedgerResult<Uuid> {
        let record = OutboxRecord::from_event(event);
        self.repository.save(&record).await?;

        tracing::debug!(
            outbox_id = %record.id,
            stream_id = %record.stream_id,
            event_type = %record.event_type,
            "Event staged in outbox"
        );

        let Some(claimed) = self
            .repository
            .claim(record.id, self.config.max_retries, Utc::now())
            .await?
        else {
            // a processor run picked it up first
            return Ok(record.id);
        };

        match self.deliver(&claimed).await? {
            DeliveryOutcome::Published => Ok(record.id),
            DeliveryOutcome::Retrying(err) | DeliveryOutcome::DeadLettered(err) => Err(LedgerError::Delivery(err)),
        }
    }

    /// Stage events in bulk and deliver them in the background.
    pub async fn publish_many(self: &Arc<Self>, events: &[EventEnvelope]) -> LedgerResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let records: Vec<OutboxRecord> = events.iter().map(OutboxRecord::from_event).collect();
        self.repository.save_many(&records).await?;

        let staged = records.len();
        tracing::debug!(count = staged, "Events staged in outbox");

        let publisher = Arc::clone(self);
        // detached: anything this task leaves undelivered is picked up by process_pending
        tokio::spawn(async move {
            let report = publisher.deliver_staged(records).await;
            tracing::debug!(
                published = report.published,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "Background outbox delivery finished"
            );
        });

        Ok(staged)
    }

    /// Drain due records, oldest first. One failing record never stops the
    /// rest of the batch.
    pub async fn process_pending(&self, limit: usize) -> LedgerResult<ProcessingReport> {
        let due = self
            .repository
            .find_pending(limit, self.config.max_retries, Utc::now())
            .await?;

        if due.is_empty() {
            return Ok(ProcessingReport::default());
        }

        tracing::debug!(count = due.len(), "Processing pending outbox records");
        let report = self.deliver_staged(due).await;

        tracing::info!(
            selected = report.selected,
            published = report.published,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            skipped = report.skipped,
            "Outbox batch processed"
        );
        Ok(report)
    }

    /// Delete PUBLISHED records older than `retention`.
    pub async fn cleanup_published(&self, retention: Duration) -> LedgerResult<u64> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| LedgerError::invalid_argument(format!("retention out of range: {}", e)))?;
        let cutoff = Utc::now() - retention;

        let deleted = self.repository.delete_published_before(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted = deleted, cutoff = %cutoff, "Cleaned up published outbox records");
        }
        Ok(deleted)
    }

    pub async fn dead_letters(&self, limit: usize) -> LedgerResult<Vec<OutboxRecord>> {
        self.repository.find_dead_letters(limit).await
    }

    pub async fn requeue_dead_letter(&self, id: Uuid) -> LedgerResult<bool> {
        let requeued = self.repository.requeue_dead_letter(id).await?;
        if requeued {
            tracing::info!(outbox_id = %id, "Dead letter requeued");
        }
        Ok(requeued)
    }

    async fn deliver_staged(&self, records: Vec<OutboxRecord>) -> ProcessingReport {
        let mut report = ProcessingReport {
            selected: records.len(),
            ..Default::default()
        };

        for candidate in records {
            // the snapshot may be stale; only the claimed row is trusted
            let record = match self
                .repository
                .claim(candidate.id, self.config.max_retries, Utc::now())
                .await
            {
                Ok(Some(record)) => record,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(outbox_id = %candidate.id, error = %e, "Failed to claim outbox record");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.deliver(&record).await {
                Ok(DeliveryOutcome::Published) => report.published += 1,
                Ok(DeliveryOutcome::Retrying(_)) => report.failed += 1,
                Ok(DeliveryOutcome::DeadLettered(_)) => report.dead_lettered += 1,
                Err(e) => {
                    tracing::error!(outbox_id = %record.id, error = %e, "Outbox bookkeeping failed");
                    report.skipped += 1;
                }
            }
        }

        report
    }

    /// Send a claimed record and resolve its status.
    async fn deliver(&self, record: &OutboxRecord) -> LedgerResult<DeliveryOutcome> {
        let started = Instant::now();
        let sent = match record.to_message() {
            Ok(message) => self.transport.emit(&record.event_type, &message).await,
            Err(e) => Err(DeliveryError::Failed(format!("could not encode message: {}", e))),
        };
        let elapsed = started.elapsed().as_secs_f64();

        if let Some(metrics) = &self.metrics {
            metrics.record_delivery(&record.event_type, elapsed, sent.is_ok());
        }

        let err = match sent {
            Ok(()) => {
                self.repository.mark_published(record.id).await?;
                tracing::info!(
                    outbox_id = %record.id,
                    stream_id = %record.stream_id,
                    event_type = %record.event_type,
                    "Outbox record published"
                );
                return Ok(DeliveryOutcome::Published);
            }
            Err(err) => err,
        };

        let attempts = record.retry_count + 1;
        if attempts >= self.config.max_retries {
            self.repository.mark_dead_letter(record.id, &err.to_string()).await?;
            if let Some(metrics) = &self.metrics {
                metrics.record_dead_letter(&record.event_type);
            }
            tracing::error!(
                outbox_id = %record.id,
                stream_id = %record.stream_id,
                event_type = %record.event_type,
                retry_count = attempts,
                error = %err,
                "Outbox record moved to dead letter"
            );
            return Ok(DeliveryOutcome::DeadLettered(err));
        }

        let delay = self.config.retry.delay_for_attempt(record.retry_count.max(0) as u32);
        let now = Utc::now();
        let next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.repository
            .mark_failed(record.id, &err.to_string(), next_attempt_at)
            .await?;

        tracing::warn!(
            outbox_id = %record.id,
            event_type = %record.event_type,
            retry_count = attempts,
            next_attempt_at = %next_attempt_at,
            error = %err,
            "Outbox delivery failed, will retry"
        );
        Ok(DeliveryOutcome::Retrying(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::record::OutboxStatus;
    use crate::outbox::repository::InMemoryOutboxRepository;
    use crate::outbox::transport::testing::ScriptedTransport;
    use serde_json::json;

    fn immediate_retries() -> OutboxConfig {
        OutboxConfig {
            retry: RetryConfig {
                initial_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                ..RetryConfig::outbox()
            },
            ..OutboxConfig::default()
        }
    }

    fn setup(config: OutboxConfig) -> (Arc<OutboxPublisher>, Arc<InMemoryOutboxRepository>, Arc<ScriptedTransport>) {
        let repo = Arc::new(InMemoryOutboxRepository::new());
        let transport = Arc::new(ScriptedTransport::new());
        let publisher = Arc::new(OutboxPublisher::new(repo.clone(), transport.clone(), config));
        (publisher, repo, transport)
    }

    fn event(seq: i64) -> EventEnvelope {
        EventEnvelope::new("acc-1", seq, "CoinsAdded", json!({ "amount": seq }))
    }

    #[tokio::test]
    async fn test_publish_delivers_and_marks_published() {
        let (publisher, repo, transport) = setup(OutboxConfig::default());

        let id = publisher.publish(&event(1)).await.unwrap();

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Published);
        assert!(record.published_at.is_some());
        assert_eq!(transport.delivered_count().await, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_record_for_retry() {
        let (publisher, repo, transport) = setup(OutboxConfig::default());
        transport.fail_next(1).await;

        let err = publisher.publish(&event(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Delivery(DeliveryError::Failed(_))));

        let records = repo.find_by_stream("acc-1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OutboxStatus::Failed);
        assert_eq!(records[0].retry_count, 1);
        // default schedule waits a second before the next attempt
        assert!(records[0].next_attempt_at > Utc::now());
    }

    #[tokio::test]
    async fn test_five_failures_dead_letter() {
        let (publisher, repo, transport) = setup(immediate_retries());
        transport.fail_always().await;

        let err = publisher.publish(&event(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Delivery(_)));

        for _ in 0..4 {
            publisher.process_pending(10).await.unwrap();
        }

        let dead = publisher.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count, 5);
        assert_eq!(dead[0].status, OutboxStatus::DeadLetter);

        // no further attempts
        let report = publisher.process_pending(10).await.unwrap();
        assert_eq!(report, ProcessingReport::default());
        assert!(repo.find_pending(10, 5, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fewer_failures_stay_eligible() {
        let (publisher, repo, transport) = setup(immediate_retries());
        transport.fail_next(4).await;

        let _ = publisher.publish(&event(1)).await;
        for _ in 0..3 {
            publisher.process_pending(10).await.unwrap();
        }

        let pending = repo.find_pending(10, 5, Utc::now()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, OutboxStatus::Failed);
        assert_eq!(pending[0].retry_count, 4);

        let report = publisher.process_pending(10).await.unwrap();
        assert_eq!(report.published, 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let (publisher, repo, transport) = setup(OutboxConfig::default());
        let records: Vec<OutboxRecord> = (1..=3).map(|seq| OutboxRecord::from_event(&event(seq))).collect();
        repo.save_many(&records).await.unwrap();
        transport.fail_next(1).await;

        let report = publisher.process_pending(10).await.unwrap();

        assert_eq!(report.selected, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.published, 2);
    }

    #[tokio::test]
    async fn test_claimed_records_are_skipped() {
        let (publisher, repo, transport) = setup(OutboxConfig::default());
        let record = OutboxRecord::from_event(&event(1));
        repo.save(&record).await.unwrap();

        let due = repo.find_pending(10, 5, Utc::now()).await.unwrap();
        repo.claim(record.id, 5, Utc::now()).await.unwrap();

        let report = publisher.deliver_staged(due).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(transport.delivered_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_snapshot_still_reaches_dead_letter() {
        let (publisher, repo, transport) = setup(immediate_retries());
        transport.fail_always().await;

        let _ = publisher.publish(&event(1)).await;
        publisher.process_pending(10).await.unwrap();
        publisher.process_pending(10).await.unwrap();

        let stale = repo.find_pending(10, 5, Utc::now()).await.unwrap();
        assert_eq!(stale[0].retry_count, 3);

        // another worker resolves the record after the snapshot was taken
        publisher.process_pending(10).await.unwrap();
        let report = publisher.deliver_staged(stale).await;
        assert_eq!(report.dead_lettered, 1);

        let record = repo.find_by_stream("acc-1").await.unwrap().remove(0);
        assert_eq!(record.status, OutboxStatus::DeadLetter);
        assert_eq!(record.retry_count, 5);
        assert!(repo.find_pending(10, 5, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_snapshot_respects_backoff() {
        let (publisher, repo, transport) = setup(OutboxConfig::default());
        let record = OutboxRecord::from_event(&event(1));
        repo.save(&record).await.unwrap();
        transport.fail_next(1).await;

        let stale = repo.find_pending(10, 5, Utc::now()).await.unwrap();
        publisher.process_pending(10).await.unwrap();

        // the failed attempt scheduled a retry a second out
        let report = publisher.deliver_staged(stale).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(transport.delivered_count().await, 0);
        assert_eq!(repo.get(record.id).await.unwrap().unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn test_publish_many_delivers_in_background() {
        let (publisher, repo, transport) = setup(OutboxConfig::default());

        let staged = publisher.publish_many(&[event(1), event(2)]).await.unwrap();
        assert_eq!(staged, 2);

        for _ in 0..50 {
            if transport.delivered_count().await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(transport.delivered_count().await, 2);
        let records = repo.find_by_stream("acc-1").await.unwrap();
        assert!(records.iter().all(|r| r.status == OutboxStatus::Published));
    }

    #[tokio::test]
    async fn test_cleanup_and_requeue() {
        let (publisher, repo, transport) = setup(immediate_retries());
        let published = publisher.publish(&event(1)).await.unwrap();

        transport.fail_always().await;
        let _ = publisher.publish(&event(2)).await;
        for _ in 0..4 {
            publisher.process_pending(10).await.unwrap();
        }
        let dead = publisher.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);

        assert!(publisher.requeue_dead_letter(dead[0].id).await.unwrap());
        assert_eq!(repo.find_pending(10, 5, Utc::now()).await.unwrap().len(), 1);

        let deleted = publisher.cleanup_published(Duration::ZERO).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get(published).await.unwrap().is_none());
    }
}

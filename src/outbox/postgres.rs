use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::LedgerResult;
use super::record::{OutboxRecord, OutboxStatus};
use super::repository::OutboxRepository;

// ============================================================================
// PostgreSQL Outbox Repository
// ============================================================================
//
// Table layout lives in schema/outbox.sql. Status transitions are single
// UPDATE statements guarded on the current status, so `claim` stays atomic
// across processes.
//
// ============================================================================

const COLUMNS: &str = "id, event_id, stream_id, event_type, payload, sequence_number, occurred_at, \
     status, retry_count, last_error, created_at, next_attempt_at, processed_at, published_at";

const INSERT_RECORD: &str = "INSERT INTO outbox (\
     id, event_id, stream_id, event_type, payload, sequence_number, occurred_at, \
     status, retry_count, last_error, created_at, next_attempt_at, processed_at, published_at\
     ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)";

const MARK_PUBLISHED: &str = "UPDATE outbox SET status = 'PUBLISHED', published_at = NOW(), last_error = NULL \
     WHERE id = $1";

const MARK_FAILED: &str = "UPDATE outbox SET status = 'FAILED', retry_count = retry_count + 1, \
     last_error = $2, next_attempt_at = $3 WHERE id = $1";

const MARK_DEAD_LETTER: &str = "UPDATE outbox SET status = 'DEAD_LETTER', retry_count = retry_count + 1, \
     last_error = $2 WHERE id = $1";

const REQUEUE_DEAD_LETTER: &str = "UPDATE outbox SET status = 'PENDING', retry_count = 0, next_attempt_at = NOW() \
     WHERE id = $1 AND status = 'DEAD_LETTER'";

const DELETE_PUBLISHED: &str = "DELETE FROM outbox WHERE status = 'PUBLISHED' AND published_at < $1";

fn claim_returning() -> String {
    format!(
        "UPDATE outbox SET status = 'PROCESSING', processed_at = $3 \
         WHERE id = $1 AND status IN ('PENDING', 'FAILED') AND retry_count < $2 AND next_attempt_at <= $3 \
         RETURNING {}",
        COLUMNS
    )
}

fn select_pending() -> String {
    format!(
        "SELECT {} FROM outbox \
         WHERE status IN ('PENDING', 'FAILED') AND retry_count < $1 AND next_attempt_at <= $2 \
         ORDER BY created_at ASC LIMIT $3",
        COLUMNS
    )
}

fn select_by_stream() -> String {
    format!("SELECT {} FROM outbox WHERE stream_id = $1 ORDER BY sequence_number ASC", COLUMNS)
}

fn select_dead_letters() -> String {
    format!(
        "SELECT {} FROM outbox WHERE status = 'DEAD_LETTER' ORDER BY created_at ASC LIMIT $1",
        COLUMNS
    )
}

fn select_one() -> String {
    format!("SELECT {} FROM outbox WHERE id = $1", COLUMNS)
}

fn from_row(row: &PgRow) -> LedgerResult<OutboxRecord> {
    let status: String = row.try_get("status")?;
    Ok(OutboxRecord {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        stream_id: row.try_get("stream_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        sequence_number: row.try_get("sequence_number")?,
        occurred_at: row.try_get("occurred_at")?,
        status: status.parse::<OutboxStatus>()?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        processed_at: row.try_get("processed_at")?,
        published_at: row.try_get("published_at")?,
    })
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert<'e, E>(executor: E, record: &OutboxRecord) -> LedgerResult<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(INSERT_RECORD)
            .bind(record.id)
            .bind(record.event_id)
            .bind(&record.stream_id)
            .bind(&record.event_type)
            .bind(&record.payload)
            .bind(record.sequence_number)
            .bind(record.occurred_at)
            .bind(record.status.as_str())
            .bind(record.retry_count)
            .bind(&record.last_error)
            .bind(record.created_at)
            .bind(record.next_attempt_at)
            .bind(record.processed_at)
            .bind(record.published_at)
            .execute(executor)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn save(&self, record: &OutboxRecord) -> LedgerResult<()> {
        Self::insert(&self.pool, record).await
    }

    async fn save_many(&self, records: &[OutboxRecord]) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::insert(&mut *tx, record).await?;
        }
        tx.commit().await?;

        tracing::debug!(count = records.len(), "Staged outbox records");
        Ok(())
    }

    async fn find_pending(&self, limit: usize, max_retries: i32, now: DateTime<Utc>) -> LedgerResult<Vec<OutboxRecord>> {
        let rows = sqlx::query(&select_pending())
            .bind(max_retries)
            .bind(now)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(from_row).collect()
    }

    async fn claim(&self, id: Uuid, max_retries: i32, now: DateTime<Utc>) -> LedgerResult<Option<OutboxRecord>> {
        let row = sqlx::query(&claim_returning())
            .bind(id)
            .bind(max_retries)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(from_row).transpose()
    }

    async fn mark_published(&self, id: Uuid) -> LedgerResult<()> {
        sqlx::query(MARK_PUBLISHED).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, next_attempt_at: DateTime<Utc>) -> LedgerResult<()> {
        sqlx::query(MARK_FAILED)
            .bind(id)
            .bind(error)
            .bind(next_attempt_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_dead_letter(&self, id: Uuid, error: &str) -> LedgerResult<()> {
        sqlx::query(MARK_DEAD_LETTER)
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_stream(&self, stream_id: &str) -> LedgerResult<Vec<OutboxRecord>> {
        let rows = sqlx::query(&select_by_stream())
            .bind(stream_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(from_row).collect()
    }

    async fn find_dead_letters(&self, limit: usize) -> LedgerResult<Vec<OutboxRecord>> {
        let rows = sqlx::query(&select_dead_letters())
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(from_row).collect()
    }

    async fn requeue_dead_letter(&self, id: Uuid) -> LedgerResult<bool> {
        let result = sqlx::query(REQUEUE_DEAD_LETTER).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        let result = sqlx::query(DELETE_PUBLISHED).bind(cutoff).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Option<OutboxRecord>> {
        let row = sqlx::query(&select_one())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(from_row).transpose()
    }
}

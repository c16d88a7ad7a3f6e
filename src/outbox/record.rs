use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::event_sourcing::core::EventEnvelope;

// ============================================================================
// Outbox Record
// ============================================================================
//
// Lifecycle:
//   PENDING -> PROCESSING -> PUBLISHED
//                         -> FAILED (retry_count + 1, next_attempt_at pushed out)
//                         -> DEAD_LETTER (retry ceiling reached)
//   FAILED re-enters the pending pool once next_attempt_at has passed.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
    DeadLetter,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::DeadLetter => "DEAD_LETTER",
        }
    }

    /// Statuses a worker may claim.
    pub fn is_claimable(&self) -> bool {
        matches!(self, OutboxStatus::Pending | OutboxStatus::Failed)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            "DEAD_LETTER" => Ok(OutboxStatus::DeadLetter),
            other => Err(LedgerError::Storage(format!("unknown outbox status {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub event_id: Uuid,
    pub stream_id: String,
    pub event_type: String,
    pub payload: Value,
    pub sequence_number: i64,
    pub occurred_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn from_event(event: &EventEnvelope) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            event_id: event.event_id,
            stream_id: event.stream_id.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            sequence_number: event.sequence_number,
            occurred_at: event.occurred_at,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            next_attempt_at: now,
            processed_at: None,
            published_at: None,
        }
    }

    /// Due for delivery under the given retry ceiling.
    pub fn is_eligible(&self, max_retries: i32, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.retry_count < max_retries && self.next_attempt_at <= now
    }

    /// Wire form handed to the transport.
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&OutboxMessage {
            event_id: self.event_id,
            stream_id: &self.stream_id,
            event_type: &self.event_type,
            sequence_number: self.sequence_number,
            occurred_at: self.occurred_at,
            payload: &self.payload,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboxMessage<'a> {
    event_id: Uuid,
    stream_id: &'a str,
    event_type: &'a str,
    sequence_number: i64,
    occurred_at: DateTime<Utc>,
    payload: &'a Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_is_pending_and_due() {
        let event = EventEnvelope::new("acc-1", 3, "CoinsAdded", json!({ "amount": 4 }));
        let record = OutboxRecord::from_event(&event);

        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.event_id, event.event_id);
        assert_eq!(record.retry_count, 0);
        assert!(record.is_eligible(5, Utc::now()));
        assert!(!record.is_eligible(0, Utc::now()));
    }

    #[test]
    fn test_status_strings() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Published,
            OutboxStatus::Failed,
            OutboxStatus::DeadLetter,
        ] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("LOST".parse::<OutboxStatus>().is_err());
    }

    #[test]
    fn test_message_shape() {
        let event = EventEnvelope::new("acc-1", 1, "AccountCreated", json!({ "initialCoins": 10 }));
        let record = OutboxRecord::from_event(&event);

        let message: Value = serde_json::from_str(&record.to_message().unwrap()).unwrap();
        assert_eq!(message["streamId"], "acc-1");
        assert_eq!(message["eventType"], "AccountCreated");
        assert_eq!(message["payload"]["initialCoins"], 10);
    }
}

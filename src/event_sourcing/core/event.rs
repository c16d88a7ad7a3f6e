use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

// ============================================================================
// Event Envelope - Persisted Event Record
// ============================================================================
//
// Every event in a stream is stored as an envelope: identity, position in
// the stream, type tag and a JSON payload. The payload is decoded into a
// typed domain event only when an aggregate replays it.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    // Event Identity
    pub event_id: Uuid,
    pub stream_id: String,
    pub sequence_number: i64,

    // Event Type Information
    pub event_type: String,
    pub event_version: i32,

    // Event Payload
    pub payload: Value,

    // Causation & Correlation
    pub causation_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,

    // Timing
    pub occurred_at: DateTime<Utc>,

    pub metadata: HashMap<String, String>,
}

impl EventEnvelope {
    pub fn new(
        stream_id: impl Into<String>,
        sequence_number: i64,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            stream_id: stream_id.into(),
            sequence_number,
            event_type: event_type.into(),
            event_version: 1,
            payload,
            causation_id: None,
            correlation_id: None,
            occurred_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Typed view over a stream's events.
///
/// `decode` returns `Ok(None)` for event types the aggregate does not know,
/// so replay can skip them instead of failing.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync {
    fn event_type(&self) -> &'static str;

    fn decode(event_type: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error>;

    fn event_version() -> i32 where Self: Sized { 1 }

    /// Payload as stored, without the type tag.
    fn to_payload(&self) -> Result<Value, serde_json::Error>;
}

// ============================================================================
// Event Serialization Helpers
// ============================================================================

pub fn serialize_event<E: Serialize>(event: &E) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub fn deserialize_event<E: DeserializeOwned>(json: &str) -> Result<E, serde_json::Error> {
    serde_json::from_str(json)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_envelope_creation() {
        let correlation_id = Uuid::new_v4();

        let envelope = EventEnvelope::new("acc-1", 1, "CoinsAdded", json!({"amount": 5}))
            .with_correlation(correlation_id)
            .with_metadata("source", "test");

        assert_eq!(envelope.stream_id, "acc-1");
        assert_eq!(envelope.sequence_number, 1);
        assert_eq!(envelope.event_type, "CoinsAdded");
        assert_eq!(envelope.event_version, 1);
        assert_eq!(envelope.correlation_id, Some(correlation_id));
        assert_eq!(envelope.metadata.get("source").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_envelope_survives_json() {
        let envelope = EventEnvelope::new("acc-2", 3, "AccountDeleted", json!({"final_balance": 40}));

        let json = serialize_event(&envelope).unwrap();
        let restored: EventEnvelope = deserialize_event(&json).unwrap();

        assert_eq!(restored, envelope);
    }
}

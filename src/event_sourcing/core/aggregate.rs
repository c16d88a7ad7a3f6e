use crate::error::{LedgerError, LedgerResult};
use super::event::{DomainEvent, EventEnvelope};

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. Commands are validated before emitting events
// 3. Events represent facts that have already happened
// 4. All state changes flow through `apply`
//
// `Aggregate` is the per-domain state machine; `AggregateRoot` is the
// generic engine that replays history, records new events and tracks the
// version the store must hold when those events are saved.
//
// ============================================================================

/// Domain state rebuilt from events.
pub trait Aggregate: Default + Send + Sync {
    type Event: DomainEvent;

    /// Name used in logs and outbox records.
    const AGGREGATE_TYPE: &'static str;

    /// Apply one event to the in-memory state. Must not fail: business
    /// rules are checked before an event is emitted, never on replay.
    fn apply(&mut self, event: &Self::Event);
}

#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: String,
    state: A,
    version: i64,
    uncommitted: Vec<EventEnvelope>,
}

impl<A: Aggregate> AggregateRoot<A> {
    pub fn new(id: impl Into<String>) -> LedgerResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(LedgerError::invalid_argument("stream id must not be empty"));
        }

        Ok(Self {
            id,
            state: A::default(),
            version: 0,
            uncommitted: Vec::new(),
        })
    }

    /// Build an aggregate straight from its stored history.
    pub fn rehydrate(id: impl Into<String>, history: &[EventEnvelope]) -> LedgerResult<Self> {
        let mut aggregate = Self::new(id)?;
        aggregate.load_from_history(history)?;
        Ok(aggregate)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// Highest sequence applied from durable history or confirmed commits.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Replay stored events in ascending order.
    ///
    /// Events at or below the current version were already applied and are
    /// skipped, so feeding the same history twice leaves state unchanged.
    pub fn load_from_history(&mut self, events: &[EventEnvelope]) -> LedgerResult<()> {
        if let Some(foreign) = events.iter().find(|e| e.stream_id != self.id) {
            return Err(LedgerError::StreamMismatch {
                expected: self.id.clone(),
                actual: foreign.stream_id.clone(),
            });
        }

        for envelope in events {
            if envelope.sequence_number <= self.version {
                tracing::debug!(
                    stream_id = %self.id,
                    sequence = envelope.sequence_number,
                    version = self.version,
                    "Skipping already applied event"
                );
                continue;
            }

            match A::Event::decode(&envelope.event_type, &envelope.payload)? {
                Some(event) => self.state.apply(&event),
                None => {
                    tracing::warn!(
                        stream_id = %self.id,
                        aggregate_type = A::AGGREGATE_TYPE,
                        event_type = %envelope.event_type,
                        sequence = envelope.sequence_number,
                        "Unknown event type during replay, skipping"
                    );
                }
            }

            self.version = self.version.max(envelope.sequence_number);
        }

        tracing::debug!(
            stream_id = %self.id,
            aggregate_type = A::AGGREGATE_TYPE,
            version = self.version,
            event_count = events.len(),
            "Aggregate rebuilt from history"
        );

        Ok(())
    }

    /// Record a new event: assign the next sequence, apply it so later
    /// checks in the same command see it, and buffer it for the store.
    pub fn emit(&mut self, event: A::Event) -> LedgerResult<&EventEnvelope> {
        let sequence = self.version + self.uncommitted.len() as i64 + 1;
        let payload = event.to_payload()?;

        self.state.apply(&event);

        let mut envelope = EventEnvelope::new(self.id.clone(), sequence, event.event_type(), payload);
        envelope.event_version = A::Event::event_version();
        self.uncommitted.push(envelope);

        Ok(&self.uncommitted[self.uncommitted.len() - 1])
    }

    /// Version the store must hold for the buffered events to be accepted.
    pub fn expected_version(&self) -> i64 {
        self.version
    }

    pub fn uncommitted(&self) -> &[EventEnvelope] {
        &self.uncommitted
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Called once the store confirmed the buffered events.
    pub fn mark_committed(&mut self) {
        if let Some(last) = self.uncommitted.last() {
            self.version = last.sequence_number;
        }
        self.uncommitted.clear();
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    enum CounterEvent {
        Incremented { by: i64 },
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            "Incremented"
        }

        fn decode(event_type: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error> {
            match event_type {
                "Incremented" => {
                    let by = serde_json::from_value::<i64>(payload["by"].clone())?;
                    Ok(Some(CounterEvent::Incremented { by }))
                }
                _ => Ok(None),
            }
        }

        fn to_payload(&self) -> Result<Value, serde_json::Error> {
            match self {
                CounterEvent::Incremented { by } => Ok(json!({ "by": by })),
            }
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Counter {
        total: i64,
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;
        const AGGREGATE_TYPE: &'static str = "Counter";

        fn apply(&mut self, event: &Self::Event) {
            match event {
                CounterEvent::Incremented { by } => self.total += by,
            }
        }
    }

    fn history(stream: &str, increments: &[i64]) -> Vec<EventEnvelope> {
        increments
            .iter()
            .enumerate()
            .map(|(i, by)| EventEnvelope::new(stream, i as i64 + 1, "Incremented", json!({ "by": by })))
            .collect()
    }

    #[test]
    fn test_empty_id_rejected() {
        let result = AggregateRoot::<Counter>::new("  ");
        assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));
    }

    #[test]
    fn test_replay_sets_state_and_version() {
        let aggregate = AggregateRoot::<Counter>::rehydrate("c-1", &history("c-1", &[1, 2, 3])).unwrap();

        assert_eq!(aggregate.state().total, 6);
        assert_eq!(aggregate.version(), 3);
        assert!(!aggregate.has_uncommitted());
    }

    #[test]
    fn test_replay_rejects_foreign_stream() {
        let mut aggregate = AggregateRoot::<Counter>::new("c-1").unwrap();
        let result = aggregate.load_from_history(&history("c-2", &[1]));

        assert!(matches!(result, Err(LedgerError::StreamMismatch { .. })));
        assert_eq!(aggregate.version(), 0);
    }

    #[test]
    fn test_reloading_same_history_is_noop() {
        let events = history("c-1", &[5, 5]);
        let mut aggregate = AggregateRoot::<Counter>::rehydrate("c-1", &events).unwrap();
        aggregate.load_from_history(&events).unwrap();

        assert_eq!(aggregate.state().total, 10);
        assert_eq!(aggregate.version(), 2);
    }

    #[test]
    fn test_unknown_event_skipped_but_version_advances() {
        let mut events = history("c-1", &[4]);
        events.push(EventEnvelope::new("c-1", 2, "Renamed", json!({ "name": "x" })));
        events.push(EventEnvelope::new("c-1", 3, "Incremented", json!({ "by": 1 })));

        let aggregate = AggregateRoot::<Counter>::rehydrate("c-1", &events).unwrap();

        assert_eq!(aggregate.state().total, 5);
        assert_eq!(aggregate.version(), 3);
    }

    #[test]
    fn test_emit_assigns_consecutive_sequences() {
        let mut aggregate = AggregateRoot::<Counter>::rehydrate("c-1", &history("c-1", &[1, 1])).unwrap();

        aggregate.emit(CounterEvent::Incremented { by: 10 }).unwrap();
        aggregate.emit(CounterEvent::Incremented { by: 20 }).unwrap();

        let sequences: Vec<i64> = aggregate.uncommitted().iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![3, 4]);
        assert_eq!(aggregate.state().total, 32);
        // durable version only moves on commit
        assert_eq!(aggregate.version(), 2);

        aggregate.mark_committed();
        assert_eq!(aggregate.version(), 4);
        assert!(aggregate.uncommitted().is_empty());
    }

    #[test]
    fn test_two_fresh_replays_match() {
        let events = history("c-1", &[3, 7, 11]);
        let a = AggregateRoot::<Counter>::rehydrate("c-1", &events).unwrap();
        let b = AggregateRoot::<Counter>::rehydrate("c-1", &events).unwrap();

        assert_eq!(a.state(), b.state());
        assert_eq!(a.version(), b.version());
    }
}

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::sync::Arc;
use std::time::Duration;

use crate::config::KafkaSettings;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

// ============================================================================
// Message Transport
// ============================================================================
//
// The outbox only needs one primitive from the message bus: hand over a
// serialized event and learn whether it was accepted.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Message bus unavailable: circuit breaker open")]
    CircuitOpen,

    #[error("Delivery failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn emit(&self, event_type: &str, serialized: &str) -> Result<(), DeliveryError>;
}

// ============================================================================
// Kafka / Redpanda Transport
// ============================================================================

pub struct KafkaTransport {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    topic: String,
    send_timeout: Duration,
}

impl KafkaTransport {
    pub fn new(settings: &KafkaSettings, metrics: Option<Arc<Metrics>>) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", settings.message_timeout_ms.to_string())
            .create()?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        };
        let mut circuit_breaker = CircuitBreaker::new(cb_config);
        if let Some(metrics) = metrics {
            circuit_breaker = circuit_breaker.with_metrics(metrics);
        }

        tracing::info!(brokers = %settings.brokers, topic = %settings.topic, "Kafka producer created");

        Ok(Self {
            producer,
            circuit_breaker,
            topic: settings.topic.clone(),
            send_timeout: Duration::from_millis(settings.message_timeout_ms),
        })
    }
}

#[async_trait]
impl MessageTransport for KafkaTransport {
    async fn emit(&self, event_type: &str, serialized: &str) -> Result<(), DeliveryError> {
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(&self.topic)
                    .key(event_type)
                    .payload(serialized);

                self.producer
                    .send(record, rdkafka::util::Timeout::After(self.send_timeout))
                    .await
                    .map_err(|(e, _)| e.to_string())?;

                Ok::<(), String>(())
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(topic = %self.topic, event_type = %event_type, "Published to message bus");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::warn!(topic = %self.topic, "Circuit breaker open, message bus unavailable");
                Err(DeliveryError::CircuitOpen)
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::warn!(topic = %self.topic, event_type = %event_type, error = %e, "Kafka send failed");
                Err(DeliveryError::Failed(e))
            }
        }
    }
}

// ============================================================================
// Scripted Transport (tests)
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Topic carrying decision events, keyed by transaction id.
pub const DECISIONS_TOPIC: &str = "fraud.card.decisions.v1";

#[derive(Error, Debug)]
pub enum BusError {
    #[error("event publish failed: {0}")]
    Publish(String),
}

/// Downstream event bus.
///
/// `publish` awaits the broker acknowledgement; delivery is at-least-once
/// and consumers are expected to dedupe on `decision_id`.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, key: &str, payload: &str) -> Result<(), BusError>;
}

/// Tracing-backed bus for standalone runs with no broker configured.
#[derive(Debug, Default)]
pub struct LogEventBus;

impl LogEventBus {
    pub fn new() -> Self {
        LogEventBus
    }
}

#[async_trait]
impl EventBus for LogEventBus {
    async fn publish(&self, key: &str, payload: &str) -> Result<(), BusError> {
        debug!(topic = DECISIONS_TOPIC, key = %key, bytes = payload.len(), "decision event");
        Ok(())
    }
}

/// Recording bus for tests.
#[derive(Debug, Default)]
pub struct MockEventBus {
    published: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl MockEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl EventBus for MockEventBus {
    async fn publish(&self, key: &str, payload: &str) -> Result<(), BusError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BusError::Publish("mock bus failing".to_string()));
        }
        self.published
            .lock()
            .push((key.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Kafka bus (requires the `bus-kafka` Cargo feature).
///
/// Publishes with `acks=1` (leader ack) and a bounded delivery timeout.
/// Without the feature, the constructor bails so a misconfigured binary
/// fails loudly at startup instead of at first publish.
#[cfg(feature = "bus-kafka")]
pub struct KafkaEventBus {
    producer: rdkafka::producer::FutureProducer,
}

#[cfg(feature = "bus-kafka")]
impl KafkaEventBus {
    pub fn new(brokers: &str) -> anyhow::Result<Self> {
        use rdkafka::config::ClientConfig;

        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "1")
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(KafkaEventBus { producer })
    }
}

#[cfg(feature = "bus-kafka")]
#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, key: &str, payload: &str) -> Result<(), BusError> {
        use rdkafka::producer::FutureRecord;
        use rdkafka::util::Timeout;

        let record = FutureRecord::to(DECISIONS_TOPIC).key(key).payload(payload);
        self.producer
            .send(record, Timeout::After(std::time::Duration::from_secs(5)))
            .await
            .map(|_| ())
            .map_err(|(e, _)| BusError::Publish(e.to_string()))
    }
}

#[cfg(not(feature = "bus-kafka"))]
pub struct KafkaEventBus;

#[cfg(not(feature = "bus-kafka"))]
impl KafkaEventBus {
    pub fn new(_brokers: &str) -> anyhow::Result<Self> {
        anyhow::bail!("Kafka event bus requires the 'bus-kafka' Cargo feature")
    }
}

#[cfg(not(feature = "bus-kafka"))]
#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, _key: &str, _payload: &str) -> Result<(), BusError> {
        Err(BusError::Publish(
            "Kafka event bus requires the 'bus-kafka' Cargo feature".to_string(),
        ))
    }
}

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::ConsumedMessage;
use crate::config::KafkaConfig;
use crate::error::{AppError, Result};
use crate::models::DeadLetterEnvelope;

pub const ORIGINAL_TOPIC_HEADER: &str = "original_topic";
pub const FAILURE_COUNT_HEADER: &str = "failure_count";

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, envelope: &DeadLetterEnvelope) -> Result<()>;
}

/// Envelope for a message that just failed on its source topic.
pub fn envelope_from_message(message: &ConsumedMessage, failure_count: u32) -> DeadLetterEnvelope {
    DeadLetterEnvelope {
        original_topic: message.topic.clone(),
        original_key: message.key.clone(),
        original_payload: message.payload.clone().unwrap_or_default(),
        failure_count,
    }
}

/// Rebuild the envelope from a record consumed off a dead-letter topic.
///
/// A missing `original_topic` header is `Malformed`; a missing or garbled
/// `failure_count` counts as one failure.
pub fn envelope_from_dead_letter(message: &ConsumedMessage) -> Result<DeadLetterEnvelope> {
    let original_topic = message
        .header(ORIGINAL_TOPIC_HEADER)
        .filter(|topic| !topic.is_empty())
        .ok_or_else(|| AppError::Malformed(format!("missing {} header", ORIGINAL_TOPIC_HEADER)))?;

    let failure_count = message
        .header(FAILURE_COUNT_HEADER)
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);

    Ok(DeadLetterEnvelope {
        original_topic: original_topic.to_string(),
        original_key: message.key.clone(),
        original_payload: message.payload.clone().unwrap_or_default(),
        failure_count,
    })
}

pub struct KafkaDeadLetterProducer {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaDeadLetterProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set(
                "message.timeout.ms",
                config.produce_timeout.as_millis().to_string(),
            )
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()?;

        Ok(Self {
            producer,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterProducer {
    async fn publish(&self, envelope: &DeadLetterEnvelope) -> Result<()> {
        let topic = self.config.dead_letter_topic(&envelope.original_topic);
        let failure_count = envelope.failure_count.to_string();

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: ORIGINAL_TOPIC_HEADER,
                value: Some(envelope.original_topic.as_bytes()),
            })
            .insert(Header {
                key: FAILURE_COUNT_HEADER,
                value: Some(failure_count.as_bytes()),
            });

        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&topic)
            .payload(envelope.original_payload.as_slice())
            .headers(headers);
        if let Some(key) = envelope.original_key.as_deref() {
            record = record.key(key);
        }

        match self.producer.send(record, self.config.produce_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    topic = %topic,
                    partition = partition,
                    offset = offset,
                    original_topic = %envelope.original_topic,
                    "Message dead-lettered"
                );
                Ok(())
            }
            Err((e, _)) => {
                error!(
                    topic = %topic,
                    original_topic = %envelope.original_topic,
                    error = %e,
                    "Failed to publish to dead-letter topic"
                );
                Err(AppError::Kafka(e))
            }
        }
    }
}

/// Collects envelopes in memory. Used when no broker is available.
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    published: Mutex<Vec<DeadLetterEnvelope>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<DeadLetterEnvelope> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn publish(&self, envelope: &DeadLetterEnvelope) -> Result<()> {
        self.published.lock().await.push(envelope.clone());
        Ok(())
    }
}

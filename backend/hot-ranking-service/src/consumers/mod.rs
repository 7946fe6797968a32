//! Kafka event consumers
//!
//! The group polls once and fans messages out to one worker per
//! (topic, partition). Each worker processes in offset order and commits
//! after local processing:
//! - single mode: one handler call per message
//! - batch mode: up to `batch_size` messages or `batch_timeout`, one call
//!
//! Failure policy:
//! - undecodable payloads are skipped and committed
//! - business failures are republished to `<topic>_dlq`, then committed
//! - everything else is logged and committed

mod dead_letter;
mod group;
mod interaction_events;
mod publish_events;
mod read_events;
mod reprocessor;
mod worker;

pub use dead_letter::{
    envelope_from_dead_letter, envelope_from_message, DeadLetterSink, InMemoryDeadLetterSink,
    KafkaDeadLetterProducer, FAILURE_COUNT_HEADER, ORIGINAL_TOPIC_HEADER,
};
pub use group::{ConsumerGroup, KafkaOffsetCommitter};
pub use interaction_events::InteractionEventHandler;
pub use publish_events::PublishEventHandler;
pub use read_events::ReadEventHandler;
pub use reprocessor::{DeadLetterReprocessor, ReprocessOutcome};
pub use worker::PartitionWorker;

use async_trait::async_trait;
use rdkafka::message::{Headers, Message};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, ErrorClass, Result};

/// Owned copy of a consumed record, detached from the consumer's buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl ConsumedMessage {
    pub fn from_kafka<M: Message>(message: &M) -> Self {
        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|header| {
                        header
                            .value
                            .map(|value| (header.key.to_string(), value.to_vec()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| k.to_vec()),
            payload: message.payload().map(|p| p.to_vec()),
            headers,
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name == key)
            .and_then(|(_, value)| std::str::from_utf8(value).ok())
    }

    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Decode the JSON payload. Empty or invalid payloads are `Malformed`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self.payload.as_deref() {
            None | Some([]) => Err(AppError::Malformed("empty payload".to_string())),
            Some(bytes) => serde_json::from_slice(bytes).map_err(AppError::malformed),
        }
    }
}

/// Commits `next_offset` (last processed offset + 1) for a partition.
#[cfg_attr(test, mockall::automock)]
pub trait OffsetCommitter: Send + Sync {
    fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ConsumedMessage) -> Result<()>;
}

/// Result of applying one batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub applied: usize,
    pub skipped: usize,
    /// Index into the batch and the business failure for that message.
    pub rejected: Vec<(usize, AppError)>,
}

#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, messages: &[ConsumedMessage]) -> Result<BatchOutcome>;
}

#[derive(Clone)]
pub enum HandlerMode {
    Single(Arc<dyn MessageHandler>),
    Batch {
        handler: Arc<dyn BatchHandler>,
        size: usize,
        timeout: Duration,
    },
}

/// What the consumer does with a message whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Commit,
    DeadLetter,
}

pub fn disposition(err: &AppError) -> Disposition {
    match err.class() {
        ErrorClass::Business => Disposition::DeadLetter,
        ErrorClass::Transient
        | ErrorClass::Malformed
        | ErrorClass::NotImplemented
        | ErrorClass::Internal => Disposition::Commit,
    }
}

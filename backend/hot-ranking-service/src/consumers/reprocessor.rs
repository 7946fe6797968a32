use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::dead_letter::envelope_from_dead_letter;
use super::{ConsumedMessage, MessageHandler};
use crate::config::DeadLetterConfig;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::DeadLetterEnvelope;
use crate::shutdown::{self, wait_for_shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprocessOutcome {
    Recovered { attempts: u32 },
    Dropped { attempts: u32 },
    /// No handler registered for the original topic.
    Unroutable,
    /// Shutdown arrived during a backoff wait. The message stays uncommitted
    /// and is retried from scratch after restart.
    Interrupted { attempts: u32 },
}

/// Retries dead-lettered messages against the handler of their original
/// topic with exponential backoff. Terminal: a message that keeps failing is
/// logged and dropped, never re-queued.
pub struct DeadLetterReprocessor {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    config: DeadLetterConfig,
    shutdown: watch::Receiver<bool>,
}

impl DeadLetterReprocessor {
    pub fn new(config: DeadLetterConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            config,
            shutdown: shutdown::never(),
        }
    }

    pub fn register(
        mut self,
        original_topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.handlers.insert(original_topic.into(), handler);
        self
    }

    /// Cut backoff waits short when `shutdown` flips.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Wait after the given zero-based attempt: `base_wait * 2^attempt`,
    /// capped at `max_wait`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.config
            .base_wait
            .checked_mul(factor)
            .unwrap_or(self.config.max_wait)
            .min(self.config.max_wait)
    }

    pub async fn reprocess(
        &self,
        envelope: &DeadLetterEnvelope,
        source: &ConsumedMessage,
    ) -> ReprocessOutcome {
        let Some(handler) = self.handlers.get(&envelope.original_topic) else {
            warn!(
                original_topic = %envelope.original_topic,
                "No retry handler for dead-lettered message, dropping"
            );
            metrics::record_dead_letter(&envelope.original_topic, "unroutable");
            return ReprocessOutcome::Unroutable;
        };

        let original = ConsumedMessage {
            topic: envelope.original_topic.clone(),
            partition: source.partition,
            offset: source.offset,
            key: envelope.original_key.clone(),
            payload: Some(envelope.original_payload.clone()),
            headers: Vec::new(),
        };

        let max_retries = self.config.max_retries;
        for attempt in 0..max_retries {
            match handler.handle(&original).await {
                Ok(()) => {
                    info!(
                        original_topic = %envelope.original_topic,
                        attempts = attempt + 1,
                        prior_failures = envelope.failure_count,
                        "Dead-lettered message recovered after retry"
                    );
                    metrics::record_dead_letter(&envelope.original_topic, "recovered");
                    return ReprocessOutcome::Recovered {
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    warn!(
                        original_topic = %envelope.original_topic,
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        error = %e,
                        "Dead-letter retry failed"
                    );
                    if attempt + 1 < max_retries {
                        let mut shutdown = self.shutdown.clone();
                        tokio::select! {
                            biased;
                            _ = wait_for_shutdown(&mut shutdown) => {
                                info!(
                                    original_topic = %envelope.original_topic,
                                    attempts = attempt + 1,
                                    "Dead-letter retry interrupted by shutdown"
                                );
                                metrics::record_dead_letter(
                                    &envelope.original_topic,
                                    "interrupted",
                                );
                                return ReprocessOutcome::Interrupted {
                                    attempts: attempt + 1,
                                };
                            }
                            _ = tokio::time::sleep(self.backoff(attempt)) => {}
                        }
                    }
                }
            }
        }

        error!(
            original_topic = %envelope.original_topic,
            attempts = max_retries,
            prior_failures = envelope.failure_count,
            "Dead-lettered message failed permanently, dropped"
        );
        metrics::record_dead_letter(&envelope.original_topic, "dropped");
        ReprocessOutcome::Dropped {
            attempts: max_retries,
        }
    }
}

#[async_trait]
impl MessageHandler for DeadLetterReprocessor {
    /// Fails only with `Cancelled` when shutdown interrupts the retries, so
    /// the message is left uncommitted. Every other outcome is committed.
    async fn handle(&self, message: &ConsumedMessage) -> Result<()> {
        match envelope_from_dead_letter(message) {
            Ok(envelope) => {
                if let ReprocessOutcome::Interrupted { .. } =
                    self.reprocess(&envelope, message).await
                {
                    return Err(AppError::Cancelled);
                }
            }
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Unreadable dead-letter message, dropping"
                );
                metrics::record_dead_letter(&message.topic, "unroutable");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::{ReadEventHandler, FAILURE_COUNT_HEADER, ORIGINAL_TOPIC_HEADER};
    use crate::counters::{CounterStore, InMemoryCounterStore};
    use crate::models::POST_KIND;
    use crate::repository::MockHistoryRepository;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        calls: AtomicU32,
        succeed_on: Option<u32>,
    }

    impl FlakyHandler {
        fn new(succeed_on: Option<u32>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on,
            })
        }
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _message: &ConsumedMessage) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(call) == self.succeed_on {
                Ok(())
            } else {
                Err(AppError::NotFound("post 1".to_string()))
            }
        }
    }

    fn config() -> DeadLetterConfig {
        DeadLetterConfig {
            max_retries: 5,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
        }
    }

    fn dead_letter(original_topic: Option<&str>) -> ConsumedMessage {
        let mut headers = vec![(FAILURE_COUNT_HEADER.to_string(), b"1".to_vec())];
        if let Some(topic) = original_topic {
            headers.push((ORIGINAL_TOPIC_HEADER.to_string(), topic.as_bytes().to_vec()));
        }
        ConsumedMessage {
            topic: "post_publish_dlq".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: Some(br#"{"itemId":1,"actorId":2,"status":"published"}"#.to_vec()),
            headers,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let reprocessor = DeadLetterReprocessor::new(config());
        assert_eq!(reprocessor.backoff(0), Duration::from_secs(1));
        assert_eq!(reprocessor.backoff(1), Duration::from_secs(2));
        assert_eq!(reprocessor.backoff(4), Duration::from_secs(16));
        assert_eq!(reprocessor.backoff(6), Duration::from_secs(60));
        assert_eq!(reprocessor.backoff(40), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_retried_max_times_then_dropped() {
        let handler = FlakyHandler::new(None);
        let reprocessor = DeadLetterReprocessor::new(config())
            .register("post_publish", handler.clone());

        let msg = dead_letter(Some("post_publish"));
        let envelope = envelope_from_dead_letter(&msg).unwrap();
        let started = tokio::time::Instant::now();
        let outcome = reprocessor.reprocess(&envelope, &msg).await;

        assert_eq!(outcome, ReprocessOutcome::Dropped { attempts: 5 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
        // 1 + 2 + 4 + 8 seconds between five attempts
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_later_attempt() {
        let handler = FlakyHandler::new(Some(3));
        let reprocessor = DeadLetterReprocessor::new(config())
            .register("post_publish", handler.clone());

        let msg = dead_letter(Some("post_publish"));
        let envelope = envelope_from_dead_letter(&msg).unwrap();
        assert_eq!(
            reprocessor.reprocess(&envelope, &msg).await,
            ReprocessOutcome::Recovered { attempts: 3 }
        );
    }

    #[tokio::test]
    async fn test_unknown_topic_and_missing_header_are_dropped() {
        let handler = FlakyHandler::new(Some(1));
        let reprocessor = DeadLetterReprocessor::new(config())
            .register("post_publish", handler.clone());

        reprocessor.handle(&dead_letter(Some("post_share"))).await.unwrap();
        reprocessor.handle(&dead_letter(None)).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let handler = FlakyHandler::new(None);
        let (tx, rx) = watch::channel(false);
        let reprocessor = DeadLetterReprocessor::new(config())
            .register("post_publish", handler.clone())
            .with_shutdown(rx);
        tx.send(true).unwrap();

        let msg = dead_letter(Some("post_publish"));
        let envelope = envelope_from_dead_letter(&msg).unwrap();
        let started = tokio::time::Instant::now();
        assert_eq!(
            reprocessor.reprocess(&envelope, &msg).await,
            ReprocessOutcome::Interrupted { attempts: 1 }
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);

        let result = reprocessor.handle(&msg).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_retry_counts_once_when_history_fails() {
        let counters = Arc::new(InMemoryCounterStore::default());
        let mut history = MockHistoryRepository::new();
        history
            .expect_set_history()
            .returning(|_, _| Err(AppError::Timeout("redis".to_string())));
        let read_handler = Arc::new(ReadEventHandler::new(
            counters.clone(),
            Arc::new(history),
            POST_KIND,
        ));
        let reprocessor = DeadLetterReprocessor::new(config()).register("post_read", read_handler);

        let mut msg = dead_letter(Some("post_read"));
        msg.payload = Some(br#"{"itemId":31,"actorId":4}"#.to_vec());
        let envelope = envelope_from_dead_letter(&msg).unwrap();

        assert_eq!(
            reprocessor.reprocess(&envelope, &msg).await,
            ReprocessOutcome::Recovered { attempts: 1 }
        );
        assert_eq!(counters.get(POST_KIND, 31).await.unwrap().read_count, 1);
    }
}

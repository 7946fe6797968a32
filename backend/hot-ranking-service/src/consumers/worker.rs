use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::dead_letter::{envelope_from_message, DeadLetterSink};
use super::{
    disposition, BatchHandler, ConsumedMessage, Disposition, HandlerMode, MessageHandler,
    OffsetCommitter,
};
use crate::error::{AppError, ErrorClass};
use crate::metrics;
use crate::shutdown::{self, wait_for_shutdown};

/// Processes one partition's messages in offset order.
///
/// Runs until its channel closes or shutdown is requested. A batch being
/// assembled at that point is still processed and committed. On shutdown,
/// messages still buffered in the channel are left uncommitted and are
/// redelivered to whoever owns the partition next.
pub struct PartitionWorker {
    topic: String,
    partition: i32,
    mode: HandlerMode,
    committer: Arc<dyn OffsetCommitter>,
    dead_letters: Arc<dyn DeadLetterSink>,
    shutdown: watch::Receiver<bool>,
}

impl PartitionWorker {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        mode: HandlerMode,
        committer: Arc<dyn OffsetCommitter>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            mode,
            committer,
            dead_letters,
            shutdown: shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn run(self, mut receiver: mpsc::Receiver<ConsumedMessage>) {
        debug!(topic = %self.topic, partition = self.partition, "Partition worker started");
        let mut shutdown = self.shutdown.clone();

        loop {
            let first = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!(
                        topic = %self.topic,
                        partition = self.partition,
                        "Shutdown requested, leaving buffered messages uncommitted"
                    );
                    break;
                }
                next = receiver.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            let keep_going = match &self.mode {
                HandlerMode::Single(handler) => {
                    self.process_single(handler.as_ref(), first).await
                }
                HandlerMode::Batch {
                    handler,
                    size,
                    timeout,
                } => {
                    let batch =
                        collect_batch(&mut receiver, &mut shutdown, first, *size, *timeout).await;
                    self.process_batch(handler.as_ref(), batch).await;
                    true
                }
            };
            if !keep_going {
                break;
            }
        }

        info!(topic = %self.topic, partition = self.partition, "Partition worker stopped");
    }

    /// Returns false when the handler was cut short by shutdown; that offset
    /// is not committed and the worker stops.
    async fn process_single(&self, handler: &dyn MessageHandler, message: ConsumedMessage) -> bool {
        let outcome = match handler.handle(&message).await {
            Ok(()) => "processed",
            Err(AppError::Cancelled) => {
                info!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset = message.offset,
                    "Handler interrupted by shutdown, offset left uncommitted"
                );
                metrics::record_message(&self.topic, "interrupted");
                return false;
            }
            Err(e) => self.on_failure(&message, e).await,
        };
        metrics::record_message(&self.topic, outcome);
        self.commit(message.offset);
        true
    }

    async fn process_batch(&self, handler: &dyn BatchHandler, batch: Vec<ConsumedMessage>) {
        let Some(last_offset) = batch.iter().map(|m| m.offset).max() else {
            return;
        };

        match handler.handle_batch(&batch).await {
            Ok(outcome) => {
                debug!(
                    topic = %self.topic,
                    partition = self.partition,
                    size = batch.len(),
                    applied = outcome.applied,
                    skipped = outcome.skipped,
                    rejected = outcome.rejected.len(),
                    "Batch applied"
                );
                for (index, err) in outcome.rejected {
                    match batch.get(index) {
                        Some(message) => {
                            let result = self.on_failure(message, err).await;
                            metrics::record_message(&self.topic, result);
                        }
                        None => warn!(index = index, "Batch handler rejected an unknown index"),
                    }
                }
                metrics::record_message(&self.topic, "batch_applied");
            }
            Err(e) => {
                error!(
                    topic = %self.topic,
                    partition = self.partition,
                    size = batch.len(),
                    first_offset = batch[0].offset,
                    last_offset = last_offset,
                    error = %e,
                    "Batch failed, advancing offsets"
                );
                metrics::record_message(&self.topic, "batch_failed");
            }
        }

        self.commit(last_offset);
    }

    async fn on_failure(&self, message: &ConsumedMessage, err: AppError) -> &'static str {
        match disposition(&err) {
            Disposition::DeadLetter => {
                warn!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset = message.offset,
                    error = %err,
                    "Business failure, dead-lettering message"
                );
                let envelope = envelope_from_message(message, 1);
                match self.dead_letters.publish(&envelope).await {
                    Ok(()) => "dead_lettered",
                    Err(e) => {
                        error!(
                            topic = %self.topic,
                            offset = message.offset,
                            error = %e,
                            "Dead-letter publish failed, message dropped"
                        );
                        "dead_letter_failed"
                    }
                }
            }
            Disposition::Commit if err.class() == ErrorClass::Malformed => {
                warn!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset = message.offset,
                    error = %err,
                    "Skipping malformed message"
                );
                "skipped"
            }
            Disposition::Commit => {
                error!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset = message.offset,
                    error = %err,
                    kind = err.kind(),
                    "Message processing failed, skipping"
                );
                "failed"
            }
        }
    }

    fn commit(&self, offset: i64) {
        if let Err(e) = self.committer.commit(&self.topic, self.partition, offset + 1) {
            warn!(
                topic = %self.topic,
                partition = self.partition,
                offset = offset,
                error = %e,
                "Failed to commit offset"
            );
        }
    }
}

/// Gather up to `size` messages, waiting at most `timeout` after the first.
/// Shutdown ends the wait early with whatever has been gathered.
async fn collect_batch(
    receiver: &mut mpsc::Receiver<ConsumedMessage>,
    shutdown: &mut watch::Receiver<bool>,
    first: ConsumedMessage,
    size: usize,
    timeout: Duration,
) -> Vec<ConsumedMessage> {
    let deadline = Instant::now() + timeout;
    let mut batch = Vec::with_capacity(size.max(1));
    batch.push(first);

    while batch.len() < size {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => break,
            next = tokio::time::timeout_at(deadline, receiver.recv()) => match next {
                Ok(Some(message)) => batch.push(message),
                Ok(None) | Err(_) => break,
            },
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::{BatchOutcome, InMemoryDeadLetterSink, MockOffsetCommitter};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn message(offset: i64, payload: &str) -> ConsumedMessage {
        ConsumedMessage {
            topic: "post_read".to_string(),
            partition: 2,
            offset,
            key: None,
            payload: Some(payload.as_bytes().to_vec()),
            headers: Vec::new(),
        }
    }

    /// Fails with the error named by the payload.
    struct ScriptedHandler;

    #[async_trait]
    impl MessageHandler for ScriptedHandler {
        async fn handle(&self, message: &ConsumedMessage) -> Result<()> {
            match message.payload_bytes() {
                b"business" => Err(AppError::Validation("zero id".to_string())),
                b"malformed" => Err(AppError::Malformed("bad json".to_string())),
                b"transient" => Err(AppError::Timeout("redis".to_string())),
                b"cancelled" => Err(AppError::Cancelled),
                _ => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingBatchHandler {
        sizes: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchHandler for RecordingBatchHandler {
        async fn handle_batch(&self, messages: &[ConsumedMessage]) -> Result<BatchOutcome> {
            self.sizes.lock().unwrap().push(messages.len());
            if self.fail {
                return Err(AppError::Timeout("redis".to_string()));
            }
            Ok(BatchOutcome {
                applied: messages.len(),
                ..Default::default()
            })
        }
    }

    fn committing_in_order(expected: Vec<i64>) -> MockOffsetCommitter {
        let mut committer = MockOffsetCommitter::new();
        let mut seq = mockall::Sequence::new();
        for next in expected {
            committer
                .expect_commit()
                .withf(move |topic, partition, offset| {
                    topic.to_string() == "post_read" && *partition == 2 && *offset == next
                })
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
        }
        committer
    }

    #[tokio::test]
    async fn test_single_mode_commits_every_message() {
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let worker = PartitionWorker::new(
            "post_read",
            2,
            HandlerMode::Single(Arc::new(ScriptedHandler)),
            Arc::new(committing_in_order(vec![11, 12, 13, 14])),
            sink.clone(),
        );

        let (tx, rx) = mpsc::channel(8);
        let script = [(10, "ok"), (11, "malformed"), (12, "business"), (13, "transient")];
        for (offset, payload) in script {
            tx.send(message(offset, payload)).await.unwrap();
        }
        drop(tx);
        worker.run(rx).await;

        let published = sink.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].original_topic, "post_read");
        assert_eq!(published[0].original_payload, b"business".to_vec());
        assert_eq!(published[0].failure_count, 1);
    }

    #[tokio::test]
    async fn test_batch_mode_respects_size() {
        let handler = Arc::new(RecordingBatchHandler::default());
        let worker = PartitionWorker::new(
            "post_read",
            2,
            HandlerMode::Batch {
                handler: handler.clone(),
                size: 3,
                timeout: Duration::from_secs(5),
            },
            Arc::new(committing_in_order(vec![3, 6, 7])),
            Arc::new(InMemoryDeadLetterSink::new()),
        );

        let (tx, rx) = mpsc::channel(16);
        for offset in 0..7 {
            tx.send(message(offset, "{}")).await.unwrap();
        }
        drop(tx);
        worker.run(rx).await;

        assert_eq!(*handler.sizes.lock().unwrap(), vec![3, 3, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_mode_flushes_on_timeout() {
        let handler = Arc::new(RecordingBatchHandler::default());
        let worker = PartitionWorker::new(
            "post_read",
            2,
            HandlerMode::Batch {
                handler: handler.clone(),
                size: 100,
                timeout: Duration::from_secs(1),
            },
            Arc::new(committing_in_order(vec![2, 3])),
            Arc::new(InMemoryDeadLetterSink::new()),
        );

        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(worker.run(rx));

        tx.send(message(0, "{}")).await.unwrap();
        tx.send(message(1, "{}")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(message(2, "{}")).await.unwrap();
        drop(tx);
        run.await.unwrap();

        assert_eq!(*handler.sizes.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_failed_batch_still_advances_offsets() {
        let handler = Arc::new(RecordingBatchHandler {
            fail: true,
            ..Default::default()
        });
        let worker = PartitionWorker::new(
            "post_read",
            2,
            HandlerMode::Batch {
                handler: handler.clone(),
                size: 10,
                timeout: Duration::from_millis(10),
            },
            Arc::new(committing_in_order(vec![5])),
            Arc::new(InMemoryDeadLetterSink::new()),
        );

        let (tx, rx) = mpsc::channel(16);
        for offset in 3..5 {
            tx.send(message(offset, "{}")).await.unwrap();
        }
        drop(tx);
        worker.run(rx).await;

        assert_eq!(*handler.sizes.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_buffered_messages_uncommitted() {
        let mut committer = MockOffsetCommitter::new();
        committer.expect_commit().never();
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = PartitionWorker::new(
            "post_read",
            2,
            HandlerMode::Single(Arc::new(ScriptedHandler)),
            Arc::new(committer),
            sink.clone(),
        )
        .with_shutdown(stop_rx);

        let (tx, rx) = mpsc::channel(8);
        for offset in 20..24 {
            tx.send(message(offset, "business")).await.unwrap();
        }
        stop_tx.send(true).unwrap();
        worker.run(rx).await;

        assert!(sink.published().await.is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_interrupted_handler_stops_without_committing() {
        let worker = PartitionWorker::new(
            "post_read",
            2,
            HandlerMode::Single(Arc::new(ScriptedHandler)),
            Arc::new(committing_in_order(vec![11])),
            Arc::new(InMemoryDeadLetterSink::new()),
        );

        let (tx, rx) = mpsc::channel(8);
        for (offset, payload) in [(10, "ok"), (11, "cancelled"), (12, "ok")] {
            tx.send(message(offset, payload)).await.unwrap();
        }
        worker.run(rx).await;
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_partial_batch() {
        let handler = Arc::new(RecordingBatchHandler::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = PartitionWorker::new(
            "post_read",
            2,
            HandlerMode::Batch {
                handler: handler.clone(),
                size: 100,
                timeout: Duration::from_secs(10),
            },
            Arc::new(committing_in_order(vec![2])),
            Arc::new(InMemoryDeadLetterSink::new()),
        )
        .with_shutdown(stop_rx);

        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(worker.run(rx));
        tx.send(message(0, "{}")).await.unwrap();
        tx.send(message(1, "{}")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("worker stops on shutdown")
            .unwrap();
        assert_eq!(*handler.sizes.lock().unwrap(), vec![2]);
        drop(tx);
    }
}

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{BatchHandler, BatchOutcome, ConsumedMessage, MessageHandler};
use crate::counters::CounterStore;
use crate::error::{AppError, Result};
use crate::models::{InteractionKind, ItemId, ReadEvent};
use crate::repository::HistoryRepository;
use crate::worker_pool::TaskPoolHandle;

/// Applies read events: bumps the read counter and records reading history.
///
/// In batch mode the history writes are handed to the task pool; in single
/// mode (and on dead-letter retries) they run inline. History is best-effort
/// in both: only the counter update decides whether a message failed, so a
/// retried message is never counted twice because of a history error.
pub struct ReadEventHandler {
    counters: Arc<dyn CounterStore>,
    history: Arc<dyn HistoryRepository>,
    tasks: Option<TaskPoolHandle>,
    kind: String,
}

impl ReadEventHandler {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        history: Arc<dyn HistoryRepository>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            counters,
            history,
            tasks: None,
            kind: kind.into(),
        }
    }

    pub fn with_task_pool(mut self, tasks: TaskPoolHandle) -> Self {
        self.tasks = Some(tasks);
        self
    }

    fn record_history_async(&self, tasks: &TaskPoolHandle, events: Vec<ReadEvent>) {
        for event in events {
            let history = Arc::clone(&self.history);
            let submitted = tasks.try_submit("read_history", async move {
                history.set_history(event.actor_id, event.item_id).await
            });
            if let Err(e) = submitted {
                warn!(error = %e, "Reading history write not queued");
            }
        }
    }

    async fn record_history_inline(&self, event: &ReadEvent) {
        if let Err(e) = self.history.set_history(event.actor_id, event.item_id).await {
            warn!(
                item_id = event.item_id,
                actor_id = event.actor_id,
                error = %e,
                "Reading history write failed"
            );
        }
    }
}

#[async_trait]
impl MessageHandler for ReadEventHandler {
    async fn handle(&self, message: &ConsumedMessage) -> Result<()> {
        let event: ReadEvent = message.decode()?;
        event.validate()?;

        self.counters
            .incr(&self.kind, event.item_id, InteractionKind::Read)
            .await?;
        self.record_history_inline(&event).await;
        Ok(())
    }
}

#[async_trait]
impl BatchHandler for ReadEventHandler {
    async fn handle_batch(&self, messages: &[ConsumedMessage]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let mut events = Vec::with_capacity(messages.len());

        for (index, message) in messages.iter().enumerate() {
            let decoded = message
                .decode::<ReadEvent>()
                .and_then(|event| event.validate().map(|()| event));
            match decoded {
                Ok(event) => events.push(event),
                Err(AppError::Malformed(reason)) => {
                    warn!(
                        offset = message.offset,
                        reason = %reason,
                        "Skipping malformed read event"
                    );
                    outcome.skipped += 1;
                }
                Err(e) => outcome.rejected.push((index, e)),
            }
        }

        if events.is_empty() {
            return Ok(outcome);
        }

        let ids: Vec<ItemId> = events.iter().map(|e| e.item_id).collect();
        let distinct = self
            .counters
            .incr_many(&self.kind, &ids, InteractionKind::Read)
            .await?;
        outcome.applied = events.len();
        debug!(events = events.len(), items = distinct, "Read counts applied");

        match &self.tasks {
            Some(tasks) => self.record_history_async(tasks, events),
            None => {
                for event in &events {
                    self.record_history_inline(event).await;
                }
            }
        }

        Ok(outcome)
    }
}

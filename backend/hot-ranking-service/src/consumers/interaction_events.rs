use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ConsumedMessage, MessageHandler};
use crate::counters::CounterStore;
use crate::error::Result;
use crate::models::InteractionEvent;

/// Applies like/collect toggles: `+1` increments, `-1` decrements.
pub struct InteractionEventHandler {
    counters: Arc<dyn CounterStore>,
    kind: String,
}

impl InteractionEventHandler {
    pub fn new(counters: Arc<dyn CounterStore>, kind: impl Into<String>) -> Self {
        Self {
            counters,
            kind: kind.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for InteractionEventHandler {
    async fn handle(&self, message: &ConsumedMessage) -> Result<()> {
        let event: InteractionEvent = message.decode()?;
        event.validate()?;

        let value = if event.delta > 0 {
            self.counters.incr(&self.kind, event.item_id, event.kind).await?
        } else {
            self.counters.decr(&self.kind, event.item_id, event.kind).await?
        };

        debug!(
            item_id = event.item_id,
            field = %event.kind,
            delta = event.delta,
            value = value,
            "Interaction applied"
        );
        Ok(())
    }
}

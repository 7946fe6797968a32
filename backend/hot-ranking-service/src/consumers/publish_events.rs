use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ConsumedMessage, MessageHandler};
use crate::error::{AppError, Result};
use crate::models::{PublishEvent, POST_KIND};
use crate::repository::ContentRepository;

/// Moves a post between draft and published.
///
/// An unknown post is a business failure, so the event is dead-lettered and
/// retried later (the post row may not be visible yet).
pub struct PublishEventHandler {
    content: Arc<dyn ContentRepository>,
}

impl PublishEventHandler {
    pub fn new(content: Arc<dyn ContentRepository>) -> Self {
        Self { content }
    }
}

#[async_trait]
impl MessageHandler for PublishEventHandler {
    async fn handle(&self, message: &ConsumedMessage) -> Result<()> {
        let event: PublishEvent = message.decode()?;
        event.validate()?;

        if event.biz_type != POST_KIND {
            debug!(biz_type = %event.biz_type, "Ignoring publish event for other content type");
            return Ok(());
        }

        let item = self
            .content
            .get_by_id(event.item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("post {}", event.item_id)))?;

        if item.status == event.status {
            debug!(item_id = item.id, status = event.status.as_str(), "Status unchanged");
            return Ok(());
        }

        self.content.update_status(item.id, event.status).await?;
        info!(
            item_id = item.id,
            actor_id = event.actor_id,
            from = item.status.as_str(),
            to = event.status.as_str(),
            "Post status updated"
        );
        Ok(())
    }
}

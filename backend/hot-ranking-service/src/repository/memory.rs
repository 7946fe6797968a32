use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{ContentRepository, HistoryRepository};
use crate::error::{AppError, Result};
use crate::models::{ActorId, Item, ItemId, ItemStatus};

/// Content repository over a vector of items, for tests and local runs.
#[derive(Default)]
pub struct InMemoryContentRepository {
    items: RwLock<Vec<Item>>,
}

impl InMemoryContentRepository {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    pub async fn status_of(&self, id: ItemId) -> Option<ItemStatus> {
        self.items
            .read()
            .await
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.status)
    }
}

#[async_trait]
impl ContentRepository for InMemoryContentRepository {
    async fn list_published(&self, page: u32, size: u32) -> Result<Vec<Item>> {
        let mut published: Vec<Item> = self
            .items
            .read()
            .await
            .iter()
            .filter(|item| item.status == ItemStatus::Published)
            .cloned()
            .collect();
        published.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let skip = (page.max(1) as usize - 1) * size as usize;
        Ok(published.into_iter().skip(skip).take(size as usize).collect())
    }

    async fn get_by_id(&self, id: ItemId) -> Result<Option<Item>> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .find(|item| item.id == id)
            .cloned())
    }

    async fn update_status(&self, id: ItemId, status: ItemStatus) -> Result<()> {
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| AppError::NotFound(format!("post {}", id)))?;
        item.status = status;
        item.updated_at = chrono::Utc::now();
        Ok(())
    }
}

/// Reading history keyed by actor, most recent last.
#[derive(Default)]
pub struct InMemoryHistoryRepository {
    entries: DashMap<ActorId, Vec<ItemId>>,
}

impl InMemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, actor_id: ActorId) -> Vec<ItemId> {
        self.entries
            .get(&actor_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistoryRepository for InMemoryHistoryRepository {
    async fn set_history(&self, actor_id: ActorId, item_id: ItemId) -> Result<()> {
        let mut entry = self.entries.entry(actor_id).or_default();
        entry.retain(|id| *id != item_id);
        entry.push(item_id);
        Ok(())
    }
}

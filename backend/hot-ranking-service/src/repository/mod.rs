//! Collaborator boundaries: content listing/status and reading history.

mod history;
mod memory;
mod postgres;

pub use history::RedisHistoryRepository;
pub use memory::{InMemoryContentRepository, InMemoryHistoryRepository};
pub use postgres::PgContentRepository;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{ActorId, Item, ItemId, ItemStatus};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Published items, newest first. `page` starts at 1.
    async fn list_published(&self, page: u32, size: u32) -> Result<Vec<Item>>;

    async fn get_by_id(&self, _id: ItemId) -> Result<Option<Item>> {
        Err(AppError::NotImplemented("ContentRepository::get_by_id"))
    }

    async fn update_status(&self, _id: ItemId, _status: ItemStatus) -> Result<()> {
        Err(AppError::NotImplemented("ContentRepository::update_status"))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Record that `actor_id` read `item_id`.
    async fn set_history(&self, actor_id: ActorId, item_id: ItemId) -> Result<()>;
}

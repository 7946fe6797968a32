use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};

pub type ItemId = i64;
pub type ActorId = i64;

/// Counter namespace for posts.
pub const POST_KIND: &str = "post";

/// Interaction tallied per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Read,
    Like,
    Collect,
}

impl InteractionKind {
    /// Hash field name inside the counter key.
    pub fn field(&self) -> &'static str {
        match self {
            InteractionKind::Read => "read",
            InteractionKind::Like => "like",
            InteractionKind::Collect => "collect",
        }
    }

    pub const ALL: [InteractionKind; 3] = [
        InteractionKind::Read,
        InteractionKind::Like,
        InteractionKind::Collect,
    ];
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// Like/collect/read event with an explicit direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    #[serde(alias = "postId")]
    pub item_id: ItemId,
    #[serde(alias = "userId")]
    pub actor_id: ActorId,
    pub kind: InteractionKind,
    pub delta: i8,
}

impl InteractionEvent {
    pub fn validate(&self) -> Result<()> {
        validate_ids(self.item_id, self.actor_id)?;
        if self.delta != 1 && self.delta != -1 {
            return Err(AppError::Validation(format!(
                "delta must be +1 or -1, got {}",
                self.delta
            )));
        }
        Ok(())
    }
}

/// Payload of the read topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadEvent {
    #[serde(alias = "postId")]
    pub item_id: ItemId,
    #[serde(alias = "userId")]
    pub actor_id: ActorId,
}

impl ReadEvent {
    pub fn validate(&self) -> Result<()> {
        validate_ids(self.item_id, self.actor_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Draft,
    Published,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Draft => "draft",
            ItemStatus::Published => "published",
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(ItemStatus::Draft),
            "published" => Ok(ItemStatus::Published),
            other => Err(AppError::Validation(format!("unknown item status: {}", other))),
        }
    }
}

/// Payload of the publish-lifecycle topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEvent {
    #[serde(alias = "postId")]
    pub item_id: ItemId,
    #[serde(alias = "userId")]
    pub actor_id: ActorId,
    pub status: ItemStatus,
    #[serde(default = "default_biz_type")]
    pub biz_type: String,
}

impl PublishEvent {
    pub fn validate(&self) -> Result<()> {
        validate_ids(self.item_id, self.actor_id)
    }
}

fn default_biz_type() -> String {
    POST_KIND.to_string()
}

fn validate_ids(item_id: ItemId, actor_id: ActorId) -> Result<()> {
    if item_id == 0 {
        return Err(AppError::Validation("item id is zero".to_string()));
    }
    if actor_id == 0 {
        return Err(AppError::Validation("actor id is zero".to_string()));
    }
    Ok(())
}

/// Per-item interaction tallies. Approximate under races, never negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounters {
    pub item_id: ItemId,
    pub read_count: i64,
    pub like_count: i64,
    pub collect_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ItemCounters {
    pub fn zero(item_id: ItemId) -> Self {
        Self {
            item_id,
            ..Default::default()
        }
    }

    pub fn get(&self, kind: InteractionKind) -> i64 {
        match kind {
            InteractionKind::Read => self.read_count,
            InteractionKind::Like => self.like_count,
            InteractionKind::Collect => self.collect_count,
        }
    }

    pub fn set(&mut self, kind: InteractionKind, value: i64) {
        match kind {
            InteractionKind::Read => self.read_count = value,
            InteractionKind::Like => self.like_count = value,
            InteractionKind::Collect => self.collect_count = value,
        }
    }
}

/// A post eligible for ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub author_id: ActorId,
    pub title: String,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem {
    pub item: Item,
    pub score: f64,
}

/// A message being retried out of band after a business-rule failure.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterEnvelope {
    pub original_topic: String,
    pub original_key: Option<Vec<u8>>,
    pub original_payload: Vec<u8>,
    pub failure_count: u32,
}

//! Per-item interaction counters
//!
//! Counters live in a Redis hash per item:
//! - `{kind}:counter:{item_id}` → `{read, like, collect}`
//!
//! Mutations are serialized per key by a short-lived distributed lock and
//! refresh the key's TTL, so only recently active items hold memory. Reads
//! take no lock and tolerate staleness.

mod memory;
mod redis_store;

pub use memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{InteractionKind, ItemCounters, ItemId};

pub fn counter_key(kind: &str, item_id: ItemId) -> String {
    format!("{}:counter:{}", kind, item_id)
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `by` to one field and return the new value.
    async fn incr_by(
        &self,
        kind: &str,
        item_id: ItemId,
        field: InteractionKind,
        by: i64,
    ) -> Result<i64>;

    /// Decrement one field, never below zero. Returns the resulting value.
    async fn decr(&self, kind: &str, item_id: ItemId, field: InteractionKind) -> Result<i64>;

    /// Zero-valued counters when the item has never been seen.
    async fn get(&self, kind: &str, item_id: ItemId) -> Result<ItemCounters>;

    /// Like [`CounterStore::get`] but fails with `NotFound` for unseen items.
    async fn get_existing(&self, kind: &str, item_id: ItemId) -> Result<ItemCounters>;

    async fn get_many(
        &self,
        kind: &str,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, ItemCounters>>;

    async fn incr(&self, kind: &str, item_id: ItemId, field: InteractionKind) -> Result<i64> {
        self.incr_by(kind, item_id, field, 1).await
    }

    /// Bulk increment: one locked update per distinct item, items in parallel.
    async fn incr_many(
        &self,
        kind: &str,
        item_ids: &[ItemId],
        field: InteractionKind,
    ) -> Result<usize> {
        let mut grouped: HashMap<ItemId, i64> = HashMap::new();
        for id in item_ids {
            *grouped.entry(*id).or_insert(0) += 1;
        }

        let distinct = grouped.len();
        try_join_all(
            grouped
                .into_iter()
                .map(|(id, by)| self.incr_by(kind, id, field, by)),
        )
        .await?;
        Ok(distinct)
    }
}

/// Build counters from a Redis hash. Unknown fields are ignored.
pub(crate) fn counters_from_fields(item_id: ItemId, fields: &HashMap<String, i64>) -> ItemCounters {
    let mut counters = ItemCounters::zero(item_id);
    for kind in InteractionKind::ALL {
        if let Some(value) = fields.get(kind.field()) {
            counters.set(kind, (*value).max(0));
        }
    }
    counters
}

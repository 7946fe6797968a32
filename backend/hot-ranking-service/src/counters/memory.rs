use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

use super::{counter_key, CounterStore};
use crate::error::{AppError, Result};
use crate::models::{InteractionKind, ItemCounters, ItemId};

/// Process-local counter store.
///
/// The DashMap entry guard plays the role of the per-key lock. Used by the
/// test suites and for running the pipeline without Redis.
pub struct InMemoryCounterStore {
    counters: DashMap<String, ItemCounters>,
    key_ttl: Duration,
}

impl InMemoryCounterStore {
    pub fn new(key_ttl: Duration) -> Self {
        Self {
            counters: DashMap::new(),
            key_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn expiry(&self) -> Option<chrono::DateTime<Utc>> {
        chrono::Duration::from_std(self.key_ttl)
            .ok()
            .map(|ttl| Utc::now() + ttl)
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(7 * 24 * 3600))
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_by(
        &self,
        kind: &str,
        item_id: ItemId,
        field: InteractionKind,
        by: i64,
    ) -> Result<i64> {
        let expires_at = self.expiry();
        let mut entry = self
            .counters
            .entry(counter_key(kind, item_id))
            .or_insert_with(|| ItemCounters::zero(item_id));
        let value = entry.get(field) + by;
        entry.set(field, value);
        entry.expires_at = expires_at;
        Ok(value)
    }

    async fn decr(&self, kind: &str, item_id: ItemId, field: InteractionKind) -> Result<i64> {
        let expires_at = self.expiry();
        match self.counters.get_mut(&counter_key(kind, item_id)) {
            Some(mut entry) if entry.get(field) > 0 => {
                let value = entry.get(field) - 1;
                entry.set(field, value);
                entry.expires_at = expires_at;
                Ok(value)
            }
            _ => Ok(0),
        }
    }

    async fn get(&self, kind: &str, item_id: ItemId) -> Result<ItemCounters> {
        Ok(self
            .counters
            .get(&counter_key(kind, item_id))
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| ItemCounters::zero(item_id)))
    }

    async fn get_existing(&self, kind: &str, item_id: ItemId) -> Result<ItemCounters> {
        let key = counter_key(kind, item_id);
        self.counters
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or(AppError::NotFound(key))
    }

    async fn get_many(
        &self,
        kind: &str,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, ItemCounters>> {
        let mut result = HashMap::with_capacity(item_ids.len());
        for id in item_ids {
            result.insert(*id, self.get(kind, *id).await?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::POST_KIND;

    #[tokio::test]
    async fn test_missing_item_reads_as_zero() {
        let store = InMemoryCounterStore::default();
        let counters = store.get(POST_KIND, 9).await.unwrap();
        assert_eq!(counters, ItemCounters::zero(9));
        assert!(matches!(
            store.get_existing(POST_KIND, 9).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_incr_sets_sliding_expiry() {
        let store = InMemoryCounterStore::default();
        store.incr(POST_KIND, 1, InteractionKind::Like).await.unwrap();
        let counters = store.get_existing(POST_KIND, 1).await.unwrap();
        assert_eq!(counters.like_count, 1);
        assert!(counters.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_decr_never_goes_negative() {
        let store = InMemoryCounterStore::default();
        assert_eq!(store.decr(POST_KIND, 1, InteractionKind::Collect).await.unwrap(), 0);

        store.incr(POST_KIND, 1, InteractionKind::Collect).await.unwrap();
        assert_eq!(store.decr(POST_KIND, 1, InteractionKind::Collect).await.unwrap(), 0);
        assert_eq!(store.decr(POST_KIND, 1, InteractionKind::Collect).await.unwrap(), 0);

        let counters = store.get(POST_KIND, 1).await.unwrap();
        assert_eq!(counters.collect_count, 0);
    }

    #[tokio::test]
    async fn test_incr_many_groups_duplicates() {
        let store = InMemoryCounterStore::default();
        let distinct = store
            .incr_many(POST_KIND, &[4, 5, 4, 4], InteractionKind::Read)
            .await
            .unwrap();
        assert_eq!(distinct, 2);

        let many = store.get_many(POST_KIND, &[4, 5, 6]).await.unwrap();
        assert_eq!(many[&4].read_count, 3);
        assert_eq!(many[&5].read_count, 1);
        assert_eq!(many[&6].read_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(InMemoryCounterStore::default());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.incr(POST_KIND, 77, InteractionKind::Read).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get(POST_KIND, 77).await.unwrap().read_count, 50);
    }
}

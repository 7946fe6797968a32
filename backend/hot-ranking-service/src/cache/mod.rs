//! Two-tier cache for the hot ranking snapshot
//!
//! - Local tier: in-process, TTL 10 minutes, survives remote outages as a
//!   stale-but-available fallback
//! - Remote tier: Redis, TTL 3 minutes, shared across instances
//!
//! Read path: local (fresh) → remote → local (forced, possibly stale) → empty.
//!
//! Every snapshot carries the time its pass published it. A remote hit
//! refreshes the local tier only when it is newer than what the local tier
//! already holds, so a background refresh never rolls back a later pass.

mod local;
mod remote;

pub use local::LocalTier;
pub use remote::{CachedRanking, RedisRankingTier, RemoteTier};

#[cfg(test)]
pub use remote::MockRemoteTier;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::metrics;
use crate::models::Item;

/// Result of a ranking cache read, tagged with the tier that served it.
#[derive(Debug, Clone, PartialEq)]
pub enum RankingLookup {
    Local(Vec<Item>),
    Remote(Vec<Item>),
    /// Remote tier failed or missed; served from an expired local entry.
    Stale(Vec<Item>),
    /// Nothing cached anywhere (cold start).
    Empty,
}

impl RankingLookup {
    pub fn tier(&self) -> &'static str {
        match self {
            RankingLookup::Local(_) => "local",
            RankingLookup::Remote(_) => "remote",
            RankingLookup::Stale(_) => "stale",
            RankingLookup::Empty => "empty",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RankingLookup::Empty)
    }

    pub fn into_items(self) -> Vec<Item> {
        match self {
            RankingLookup::Local(items)
            | RankingLookup::Remote(items)
            | RankingLookup::Stale(items) => items,
            RankingLookup::Empty => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct RankingCache {
    local: Arc<LocalTier>,
    remote: Arc<dyn RemoteTier>,
    config: CacheConfig,
}

impl RankingCache {
    pub fn new(remote: Arc<dyn RemoteTier>, config: CacheConfig) -> Self {
        Self {
            local: Arc::new(LocalTier::new(config.local_ttl)),
            remote,
            config,
        }
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    /// Replace the snapshot in both tiers.
    ///
    /// Both writes are attempted; a remote failure is returned after the
    /// local tier has been updated.
    pub async fn set(&self, items: &[Item]) -> Result<()> {
        let key = self.config.key.as_str();
        let snapshot = CachedRanking::new(items.to_vec());
        let local_write = async {
            self.local.set_at(key, &snapshot.items, snapshot.cached_at);
        };
        let remote_write = self.remote.store(key, &snapshot, self.config.remote_ttl);

        let ((), remote_result) = tokio::join!(local_write, remote_write);

        match remote_result {
            Ok(()) => {
                debug!(key = %key, items = items.len(), "Ranking snapshot cached in both tiers");
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Remote ranking write failed, local tier updated");
                Err(e)
            }
        }
    }

    pub async fn get(&self) -> RankingLookup {
        let key = self.config.key.as_str();

        let lookup = if let Some(items) = self.local.get(key) {
            RankingLookup::Local(items)
        } else {
            match self.remote.load(key).await {
                Ok(Some(snapshot)) => {
                    self.refresh_local(snapshot.items.clone(), snapshot.cached_at);
                    RankingLookup::Remote(snapshot.items)
                }
                Ok(None) => {
                    debug!(key = %key, "Remote ranking miss, forcing local read");
                    self.fallback()
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Remote ranking read failed, forcing local read");
                    self.fallback()
                }
            }
        };

        metrics::record_cache_lookup(lookup.tier());
        lookup
    }

    /// Latest local snapshot even if expired.
    pub fn force_get(&self) -> Option<Vec<Item>> {
        self.local.force_get(&self.config.key)
    }

    fn fallback(&self) -> RankingLookup {
        match self.force_get() {
            Some(items) => RankingLookup::Stale(items),
            None => RankingLookup::Empty,
        }
    }

    fn refresh_local(&self, items: Vec<Item>, cached_at: DateTime<Utc>) {
        let local = Arc::clone(&self.local);
        let key = self.config.key.clone();
        tokio::spawn(async move {
            if !local.set_if_newer(&key, &items, cached_at) {
                debug!(key = %key, "Local tier already holds a newer ranking, refresh skipped");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::ItemStatus;
    use chrono::Utc;
    use std::time::Duration;

    fn item(id: i64) -> Item {
        Item {
            id,
            author_id: 1,
            title: format!("post {}", id),
            status: ItemStatus::Published,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cache_with(remote: MockRemoteTier) -> RankingCache {
        RankingCache::new(Arc::new(remote), CacheConfig::default())
    }

    #[tokio::test]
    async fn test_local_hit_skips_remote() {
        let mut remote = MockRemoteTier::new();
        remote.expect_load().never();
        let cache = cache_with(remote);
        let snapshot = vec![item(1)];
        cache.local().set(&CacheConfig::default().key, &snapshot);

        assert_eq!(cache.get().await, RankingLookup::Local(snapshot));
    }

    #[tokio::test]
    async fn test_remote_hit_refreshes_local() {
        let snapshot = vec![item(5), item(6)];
        let returned = CachedRanking::new(snapshot.clone());
        let mut remote = MockRemoteTier::new();
        remote
            .expect_load()
            .times(1)
            .returning(move |_| Ok(Some(returned.clone())));
        let cache = cache_with(remote);

        let lookup = cache.get().await;
        assert_eq!(lookup, RankingLookup::Remote(snapshot.clone()));

        for _ in 0..10 {
            if cache.local().get(&CacheConfig::default().key).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.get().await, RankingLookup::Local(snapshot));
    }

    #[tokio::test]
    async fn test_remote_refresh_does_not_overwrite_newer_pass() {
        let older = CachedRanking {
            items: vec![item(1)],
            cached_at: Utc::now() - chrono::Duration::minutes(1),
        };
        let mut remote = MockRemoteTier::new();
        remote
            .expect_load()
            .times(1)
            .returning(move |_| Ok(Some(older.clone())));
        remote.expect_store().times(1).returning(|_, _, _| Ok(()));
        let cache = cache_with(remote);

        // The refresh task is queued but has not run yet.
        assert_eq!(cache.get().await.tier(), "remote");
        cache.set(&[item(2)]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let key = CacheConfig::default().key;
        assert_eq!(cache.local().get(&key).unwrap()[0].id, 2);
        let lookup = cache.get().await;
        assert_eq!(lookup.tier(), "local");
        assert_eq!(lookup.into_items()[0].id, 2);
    }

    #[tokio::test]
    async fn test_remote_error_serves_stale_local() {
        let mut remote = MockRemoteTier::new();
        remote
            .expect_load()
            .returning(|_| Err(AppError::Internal("connection refused".into())));
        let cache = cache_with(remote);
        cache.local().set_at(
            &CacheConfig::default().key,
            &[item(3)],
            Utc::now() - chrono::Duration::minutes(12),
        );

        let lookup = cache.get().await;
        assert_eq!(lookup.tier(), "stale");
        assert_eq!(lookup.into_items()[0].id, 3);
    }

    #[tokio::test]
    async fn test_cold_start_is_empty() {
        let mut remote = MockRemoteTier::new();
        remote.expect_load().returning(|_| Ok(None));
        let cache = cache_with(remote);

        assert!(cache.get().await.is_empty());
        assert!(cache.force_get().is_none());
    }

    #[tokio::test]
    async fn test_set_updates_local_even_when_remote_fails() {
        let mut remote = MockRemoteTier::new();
        remote
            .expect_store()
            .times(1)
            .returning(|_, _, _| Err(AppError::Internal("redis down".into())));
        let cache = cache_with(remote);

        assert!(cache.set(&[item(8)]).await.is_err());
        assert_eq!(cache.force_get().unwrap()[0].id, 8);
    }

    #[tokio::test]
    async fn test_set_writes_remote_with_remote_ttl() {
        let mut remote = MockRemoteTier::new();
        remote
            .expect_store()
            .withf(|key, snapshot, ttl| {
                key.to_string() == "hot:post:top"
                    && snapshot.items.len() == 2
                    && *ttl == Duration::from_secs(180)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let cache = cache_with(remote);

        cache.set(&[item(1), item(2)]).await.unwrap();
    }
}

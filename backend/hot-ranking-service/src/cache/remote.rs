use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Item;

/// Shared ranking tier, visible to every instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// `Ok(None)` on a clean miss; `Err` when the backend is unreachable.
    async fn load(&self, key: &str) -> Result<Option<CachedRanking>>;

    async fn store(&self, key: &str, snapshot: &CachedRanking, ttl: Duration) -> Result<()>;
}

/// A ranking snapshot and the time its pass published it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRanking {
    pub items: Vec<Item>,
    pub cached_at: DateTime<Utc>,
}

impl CachedRanking {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            cached_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct RedisRankingTier {
    conn: ConnectionManager,
}

impl RedisRankingTier {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RemoteTier for RedisRankingTier {
    async fn load(&self, key: &str) -> Result<Option<CachedRanking>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!("Redis GET failed for {}: {}", key, e);
                e
            })?;

        match value {
            Some(json) => {
                let cached: CachedRanking = serde_json::from_str(&json)?;
                debug!(key = %key, items = cached.items.len(), "Remote ranking hit");
                Ok(Some(cached))
            }
            None => {
                debug!(key = %key, "Remote ranking miss");
                Ok(None)
            }
        }
    }

    async fn store(&self, key: &str, snapshot: &CachedRanking, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;

        let mut conn = self.conn.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(&json)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| {
                warn!("Redis SETEX failed for {}: {}", key, e);
                e
            })?;

        debug!(key = %key, ttl_secs = ttl.as_secs(), "Remote ranking stored");
        Ok(())
    }
}

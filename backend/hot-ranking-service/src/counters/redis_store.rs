use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis_utils::RedisLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{counter_key, counters_from_fields, CounterStore};
use crate::error::{AppError, Result};
use crate::models::{InteractionKind, ItemCounters, ItemId};

/// Redis-backed counter store.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    lock: RedisLock,
    key_ttl: Duration,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager, lock: RedisLock, key_ttl: Duration) -> Self {
        Self {
            conn,
            lock,
            key_ttl,
        }
    }

    async fn read_hash(&self, key: &str) -> Result<(HashMap<String, i64>, i64)> {
        let mut conn = self.conn.clone();
        let (fields, pttl): (HashMap<String, i64>, i64) = redis::pipe()
            .cmd("HGETALL")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok((fields, pttl))
    }
}

fn with_expiry(mut counters: ItemCounters, pttl_ms: i64) -> ItemCounters {
    if pttl_ms > 0 {
        counters.expires_at = Some(Utc::now() + chrono::Duration::milliseconds(pttl_ms));
    }
    counters
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_by(
        &self,
        kind: &str,
        item_id: ItemId,
        field: InteractionKind,
        by: i64,
    ) -> Result<i64> {
        let key = counter_key(kind, item_id);
        let ttl_secs = self.key_ttl.as_secs();
        let mut conn = self.conn.clone();
        let hash_key = key.clone();

        let value = self
            .lock
            .with_lock(&key, || async move {
                let (value,): (i64,) = redis::pipe()
                    .atomic()
                    .hincr(&hash_key, field.field(), by)
                    .cmd("EXPIRE")
                    .arg(&hash_key)
                    .arg(ttl_secs)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, AppError>(value)
            })
            .await?;

        debug!(key = %key, field = %field, by = by, value = value, "Counter incremented");
        Ok(value)
    }

    async fn decr(&self, kind: &str, item_id: ItemId, field: InteractionKind) -> Result<i64> {
        let key = counter_key(kind, item_id);
        let ttl_secs = self.key_ttl.as_secs();
        let mut conn = self.conn.clone();
        let hash_key = key.clone();

        self.lock
            .with_lock(&key, || async move {
                let current: Option<i64> = redis::cmd("HGET")
                    .arg(&hash_key)
                    .arg(field.field())
                    .query_async(&mut conn)
                    .await?;

                let current = current.unwrap_or(0);
                if current <= 0 {
                    warn!(
                        key = %hash_key,
                        field = %field,
                        "Decrement without prior increment ignored"
                    );
                    return Ok::<_, AppError>(0);
                }

                let (value,): (i64,) = redis::pipe()
                    .atomic()
                    .hincr(&hash_key, field.field(), -1)
                    .cmd("EXPIRE")
                    .arg(&hash_key)
                    .arg(ttl_secs)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(value)
            })
            .await
    }

    async fn get(&self, kind: &str, item_id: ItemId) -> Result<ItemCounters> {
        let (fields, pttl) = self.read_hash(&counter_key(kind, item_id)).await?;
        Ok(with_expiry(counters_from_fields(item_id, &fields), pttl))
    }

    async fn get_existing(&self, kind: &str, item_id: ItemId) -> Result<ItemCounters> {
        let key = counter_key(kind, item_id);
        let (fields, pttl) = self.read_hash(&key).await?;
        if fields.is_empty() {
            return Err(AppError::NotFound(key));
        }
        Ok(with_expiry(counters_from_fields(item_id, &fields), pttl))
    }

    async fn get_many(
        &self,
        kind: &str,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, ItemCounters>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut pipe = redis::pipe();
        for id in item_ids {
            pipe.cmd("HGETALL").arg(counter_key(kind, *id));
        }

        let mut conn = self.conn.clone();
        let hashes: Vec<HashMap<String, i64>> = pipe.query_async(&mut conn).await?;

        Ok(item_ids
            .iter()
            .zip(hashes.iter())
            .map(|(id, fields)| (*id, counters_from_fields(*id, fields)))
            .collect())
    }
}

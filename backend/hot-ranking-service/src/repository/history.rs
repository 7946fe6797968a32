use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;

use super::HistoryRepository;
use crate::error::Result;
use crate::models::{ActorId, ItemId};

const HISTORY_LIMIT: isize = 500;
const HISTORY_TTL_SECS: u64 = 30 * 24 * 3600;

fn history_key(actor_id: ActorId) -> String {
    format!("history:{}", actor_id)
}

/// Reading history as a Redis sorted set per actor, scored by read time.
#[derive(Clone)]
pub struct RedisHistoryRepository {
    conn: ConnectionManager,
}

impl RedisHistoryRepository {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl HistoryRepository for RedisHistoryRepository {
    async fn set_history(&self, actor_id: ActorId, item_id: ItemId) -> Result<()> {
        let key = history_key(actor_id);
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg(Utc::now().timestamp_millis())
            .arg(item_id)
            .ignore()
            .cmd("ZREMRANGEBYRANK")
            .arg(&key)
            .arg(0)
            .arg(-(HISTORY_LIMIT + 1))
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(HISTORY_TTL_SECS)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_key() {
        assert_eq!(history_key(12), "history:12");
    }
}

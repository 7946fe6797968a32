//! Shared Redis plumbing for the hot-ranking pipeline.
//!
//! - [`RedisPool`]: connection bootstrap around a multiplexed `ConnectionManager`
//! - [`RedisLock`]: short-lived per-key mutual exclusion (`SET NX PX` + token release)

mod lock;

pub use lock::{LockError, LockToken, RedisLock, DEFAULT_LOCK_TTL};

use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo};
use tracing::{info, warn};

/// Redis connection pool.
///
/// `ConnectionManager` multiplexes a single connection and reconnects on
/// failure, so handing out clones is cheap.
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let info = redis_url.into_connection_info()?;
        let addr = info.addr.to_string();

        let client = Client::open(info)?;
        let manager = ConnectionManager::new(client).await?;

        info!(addr = %addr, "Redis connection manager initialized");
        Ok(Self { manager })
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Round-trip a PING; used by startup health checks.
    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!("Redis PING failed: {}", e);
                e
            })
    }
}

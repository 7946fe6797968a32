use redis::aio::ConnectionManager;
use redis::Script;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock expiration used when callers do not pick one.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

const LOCK_KEY_PREFIX: &str = "lock:";
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

// Only the holder of the token may delete the key.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },

    #[error("Redis error while locking {key}: {source}")]
    Redis {
        key: String,
        #[source]
        source: redis::RedisError,
    },
}

/// Proof of ownership for an acquired lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    value: String,
}

/// Per-key distributed lock.
///
/// Acquisition polls `SET key token NX PX ttl` until it succeeds or `wait`
/// elapses. The lock expires on its own after `ttl`, so a crashed holder
/// blocks other writers for at most one expiration window.
#[derive(Clone)]
pub struct RedisLock {
    conn: ConnectionManager,
    ttl: Duration,
    wait: Duration,
}

impl RedisLock {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self {
            conn,
            ttl,
            wait: ttl,
        }
    }

    /// Override how long `acquire` blocks before giving up.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub async fn acquire(&self, name: &str) -> Result<LockToken, LockError> {
        let key = lock_key(name);
        let value = Uuid::new_v4().to_string();
        let started = Instant::now();
        let deadline = started + self.wait;
        let mut conn = self.conn.clone();

        loop {
            let reply: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await;

            match reply {
                Ok(Some(_)) => {
                    debug!(key = %key, waited_ms = started.elapsed().as_millis(), "Lock acquired");
                    return Ok(LockToken { key, value });
                }
                Ok(None) => {}
                Err(e) if Instant::now() >= deadline => {
                    return Err(LockError::Redis { key, source: e });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Lock attempt failed, retrying");
                }
            }

            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    key,
                    waited: started.elapsed(),
                });
            }
            sleep(RETRY_INTERVAL).await;
        }
    }

    /// Release a lock. Returns `false` when the lock had already expired or
    /// been taken over by another holder.
    pub async fn release(&self, token: LockToken) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let deleted: i32 = Script::new(RELEASE_SCRIPT)
            .key(&token.key)
            .arg(&token.value)
            .invoke_async(&mut conn)
            .await
            .map_err(|source| LockError::Redis {
                key: token.key.clone(),
                source,
            })?;

        if deleted == 0 {
            warn!(key = %token.key, "Lock expired before release");
        }
        Ok(deleted == 1)
    }

    /// Run `f` while holding the lock for `name`.
    ///
    /// The lock is released once `f` resolves, whether it succeeded or not.
    pub async fn with_lock<F, Fut, T, E>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let token = self.acquire(name).await?;
        let result = f().await;

        if let Err(e) = self.release(token).await {
            warn!(error = %e, "Failed to release lock, it will expire on its own");
        }
        result
    }
}

fn lock_key(name: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, name)
}

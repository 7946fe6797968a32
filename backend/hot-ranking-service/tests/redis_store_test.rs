//! Integration Tests: Redis-backed counters, ranking tier and reading history
//!
//! Requires Docker. Run manually:
//! cargo test -p hot-ranking-service --test redis_store_test -- --ignored
//!
//! Coverage:
//! - Counter writes refresh the key TTL and go through the per-key lock
//! - Decrements never take a counter below zero
//! - The shared ranking tier round-trips a snapshot with its timestamp
//! - Reading history is trimmed to its cap and expires

mod common;

use chrono::Utc;
use common::published_item;
use hot_ranking::cache::{CachedRanking, RedisRankingTier, RemoteTier};
use hot_ranking::counters::{CounterStore, RedisCounterStore};
use hot_ranking::models::{InteractionKind, POST_KIND};
use hot_ranking::repository::{HistoryRepository, RedisHistoryRepository};
use hot_ranking::AppError;
use redis_utils::{RedisLock, RedisPool};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::WaitFor, runners::AsyncRunner, GenericImage};

async fn start_redis() -> Result<RedisPool, Box<dyn std::error::Error>> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));

    let container = image.start().await?;
    let port = container.get_host_port_ipv4(6379).await?;
    let pool = RedisPool::connect(&format!("redis://127.0.0.1:{}/", port)).await?;

    // Keep the container alive for the whole test
    Box::leak(Box::new(container));
    Ok(pool)
}

fn counter_store(redis: &RedisPool) -> RedisCounterStore {
    RedisCounterStore::new(
        redis.manager(),
        RedisLock::new(redis.manager(), Duration::from_secs(2)),
        Duration::from_secs(3600),
    )
}

#[tokio::test]
#[ignore]
async fn test_incr_sets_expiry() {
    let redis = start_redis().await.expect("redis container");
    let store = counter_store(&redis);

    assert_eq!(store.incr(POST_KIND, 1, InteractionKind::Like).await.unwrap(), 1);
    assert_eq!(store.incr(POST_KIND, 1, InteractionKind::Like).await.unwrap(), 2);

    let counters = store.get(POST_KIND, 1).await.unwrap();
    assert_eq!(counters.like_count, 2);
    assert_eq!(counters.read_count, 0);
    let expires_at = counters.expires_at.expect("counter key has a TTL");
    assert!(expires_at > Utc::now());
    assert!(expires_at <= Utc::now() + chrono::Duration::seconds(3600));
}

#[tokio::test]
#[ignore]
async fn test_decr_never_goes_negative() {
    let redis = start_redis().await.expect("redis container");
    let store = counter_store(&redis);

    assert_eq!(store.decr(POST_KIND, 2, InteractionKind::Collect).await.unwrap(), 0);
    store.incr(POST_KIND, 2, InteractionKind::Collect).await.unwrap();
    assert_eq!(store.decr(POST_KIND, 2, InteractionKind::Collect).await.unwrap(), 0);
    assert_eq!(store.decr(POST_KIND, 2, InteractionKind::Collect).await.unwrap(), 0);

    assert_eq!(store.get(POST_KIND, 2).await.unwrap().collect_count, 0);
}

#[tokio::test]
#[ignore]
async fn test_get_existing_distinguishes_missing_key() {
    let redis = start_redis().await.expect("redis container");
    let store = counter_store(&redis);

    assert!(matches!(
        store.get_existing(POST_KIND, 3).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(store.get(POST_KIND, 3).await.unwrap().read_count, 0);

    store.incr(POST_KIND, 3, InteractionKind::Read).await.unwrap();
    assert_eq!(store.get_existing(POST_KIND, 3).await.unwrap().read_count, 1);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_increments_are_not_lost() {
    let redis = start_redis().await.expect("redis container");
    let store = Arc::new(counter_store(&redis));

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.incr(POST_KIND, 4, InteractionKind::Read).await })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        task.unwrap().unwrap();
    }

    let many = store.get_many(POST_KIND, &[4, 5]).await.unwrap();
    assert_eq!(many[&4].read_count, 20);
    assert_eq!(many[&5].read_count, 0);
}

#[tokio::test]
#[ignore]
async fn test_ranking_tier_round_trip() {
    let redis = start_redis().await.expect("redis container");
    let tier = RedisRankingTier::new(redis.manager());

    assert_eq!(tier.load("hot:post:top").await.unwrap(), None);

    let at = Utc::now();
    let snapshot = CachedRanking::new(vec![published_item(7, at), published_item(3, at)]);
    tier.store("hot:post:top", &snapshot, Duration::from_secs(180))
        .await
        .unwrap();

    assert_eq!(tier.load("hot:post:top").await.unwrap(), Some(snapshot));
}

#[tokio::test]
#[ignore]
async fn test_history_is_capped_and_expires() {
    let redis = start_redis().await.expect("redis container");
    let history = RedisHistoryRepository::new(redis.manager());

    for item_id in 1..=510 {
        history.set_history(9, item_id).await.unwrap();
    }

    let mut conn = redis.manager();
    let (size, ttl): (i64, i64) = redis::pipe()
        .cmd("ZCARD")
        .arg("history:9")
        .cmd("TTL")
        .arg("history:9")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(size, 500);
    assert!(ttl > 0);
}

//! Scheduled ranking pass
//!
//! Ticks every `RankingConfig.interval`; missed ticks are skipped rather
//! than replayed. A tick that finds a pass still running is skipped too.
//! Shutdown abandons a pass in progress; the previous snapshot stays served.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::service::HotRankingService;
use crate::shutdown::wait_for_shutdown;

pub async fn start_ranking_job(
    service: HotRankingService,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "Starting ranking job");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Shutdown during ranking pass, abandoning it");
                break;
            }
            _ = run_pass(&service) => {}
        }
    }

    info!("Ranking job stopped");
}

async fn run_pass(service: &HotRankingService) {
    let started = Instant::now();
    match service.trigger_ranking().await {
        Ok(items) => debug!(
            items = items,
            duration_ms = started.elapsed().as_millis() as u64,
            "Scheduled ranking pass finished"
        ),
        Err(AppError::Busy) => debug!("Ranking pass still running, skipping tick"),
        Err(e) => warn!(
            error = %e,
            duration_ms = started.elapsed().as_millis() as u64,
            "Scheduled ranking pass failed, keeping previous snapshot"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MockRemoteTier, RankingCache};
    use crate::config::{CacheConfig, RankingConfig};
    use crate::counters::InMemoryCounterStore;
    use crate::error::Result;
    use crate::models::{Item, POST_KIND};
    use crate::ranking::RankingEngine;
    use crate::repository::{ContentRepository, MockContentRepository};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Never answers within any test's patience.
    struct StalledContent;

    #[async_trait]
    impl ContentRepository for StalledContent {
        async fn list_published(&self, _page: u32, _size: u32) -> Result<Vec<Item>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_shutdown() {
        let mut content = MockContentRepository::new();
        // First tick fires immediately, then at 60s and 120s.
        content
            .expect_list_published()
            .times(3)
            .returning(|_, _| Ok(Vec::new()));
        let mut remote = MockRemoteTier::new();
        remote.expect_store().returning(|_, _, _| Ok(()));

        let engine = RankingEngine::new(
            Arc::new(content),
            Arc::new(InMemoryCounterStore::default()),
            RankingCache::new(Arc::new(remote), CacheConfig::default()),
            RankingConfig::default(),
            POST_KIND,
        );
        let service = HotRankingService::new(engine);

        let (tx, rx) = watch::channel(false);
        let job = tokio::spawn(start_ranking_job(service, Duration::from_secs(60), rx));

        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        job.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_running_pass() {
        let remote = MockRemoteTier::new();
        let engine = RankingEngine::new(
            Arc::new(StalledContent),
            Arc::new(InMemoryCounterStore::default()),
            RankingCache::new(Arc::new(remote), CacheConfig::default()),
            RankingConfig {
                pass_deadline: Duration::from_secs(7200),
                ..RankingConfig::default()
            },
            POST_KIND,
        );
        let service = HotRankingService::new(engine);

        let (tx, rx) = watch::channel(false);
        let job = tokio::spawn(start_ranking_job(service, Duration::from_secs(60), rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), job)
            .await
            .expect("job stops without waiting for the pass")
            .unwrap();
    }
}

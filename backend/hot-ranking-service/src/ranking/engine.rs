use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::score::{age_secs, hot_score};
use super::top_n::BoundedTopN;
use crate::cache::RankingCache;
use crate::config::RankingConfig;
use crate::counters::CounterStore;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{Item, ItemId, RankedItem};
use crate::repository::ContentRepository;

/// Pages through published items, scores them against their counters and
/// publishes the bounded Top-N through the ranking cache.
#[derive(Clone)]
pub struct RankingEngine {
    content: Arc<dyn ContentRepository>,
    counters: Arc<dyn CounterStore>,
    cache: RankingCache,
    config: RankingConfig,
    kind: String,
}

impl RankingEngine {
    pub fn new(
        content: Arc<dyn ContentRepository>,
        counters: Arc<dyn CounterStore>,
        cache: RankingCache,
        config: RankingConfig,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            content,
            counters,
            cache,
            config,
            kind: kind.into(),
        }
    }

    pub fn cache(&self) -> &RankingCache {
        &self.cache
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Score every published item inside the horizon and return the Top-N,
    /// highest score first. Nothing is written.
    pub async fn rank(&self) -> Result<Vec<RankedItem>> {
        let page_size = u32::try_from(self.config.page_size)
            .map_err(|_| AppError::Config("ranking page size exceeds u32".to_string()))?;
        let horizon = chrono::Duration::from_std(self.config.horizon)
            .map_err(|e| AppError::Config(format!("ranking horizon: {}", e)))?;

        let now = Utc::now();
        let cutoff = now - horizon;
        let mut top = BoundedTopN::new(self.config.rank_size);
        let mut page = 1u32;
        let mut scanned = 0usize;

        loop {
            debug!(page = page, "Ranking: fetching page");
            let items = self.content.list_published(page, page_size).await?;
            let fetched = items.len();

            let reached_horizon = items.last().map_or(false, |item| item.created_at < cutoff);
            let eligible: Vec<Item> = items
                .into_iter()
                .filter(|item| item.created_at >= cutoff)
                .collect();

            if !eligible.is_empty() {
                debug!(page = page, items = eligible.len(), "Ranking: scoring page");
                let ids: Vec<ItemId> = eligible.iter().map(|item| item.id).collect();
                let counters = self.counters.get_many(&self.kind, &ids).await?;

                for item in eligible {
                    let likes = counters.get(&item.id).map_or(0, |c| c.like_count);
                    let score = hot_score(likes, age_secs(item.updated_at, now));
                    top.push(item, score);
                    scanned += 1;
                }
            }

            if fetched < page_size as usize || reached_horizon {
                break;
            }
            page += 1;
        }

        debug!(
            pages = page,
            scanned = scanned,
            kept = top.len(),
            "Ranking: pagination done"
        );

        Ok(top
            .into_sorted_vec()
            .into_iter()
            .map(|(item, score)| RankedItem { item, score })
            .collect())
    }

    /// One full ranking pass bounded by `deadline`.
    ///
    /// The snapshot is replaced only after ranking completes; a pass that
    /// fails or times out leaves the previous snapshot in place.
    pub async fn compute_top_n(&self, deadline: Duration) -> Result<usize> {
        let started = Instant::now();

        let ranked = match tokio::time::timeout(deadline, self.rank()).await {
            Ok(Ok(ranked)) => ranked,
            Ok(Err(e)) => {
                metrics::record_ranking_pass("error", started.elapsed());
                return Err(e);
            }
            Err(_) => {
                metrics::record_ranking_pass("timeout", started.elapsed());
                return Err(AppError::Timeout(format!(
                    "ranking pass exceeded {:?}",
                    deadline
                )));
            }
        };

        debug!(items = ranked.len(), "Ranking: publishing snapshot");
        let items: Vec<Item> = ranked.into_iter().map(|r| r.item).collect();
        let count = items.len();

        if let Err(e) = self.cache.set(&items).await {
            warn!(error = %e, "Ranking snapshot only partially published");
            metrics::record_ranking_pass("partial", started.elapsed());
            return Err(e);
        }

        metrics::record_ranking_pass("ok", started.elapsed());
        info!(
            items = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ranking pass completed"
        );
        Ok(count)
    }

    /// Current snapshot from the cache. Never computes.
    pub async fn get_top_n(&self) -> Vec<Item> {
        self.cache.get().await.into_items()
    }
}

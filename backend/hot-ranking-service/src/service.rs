use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::Item;
use crate::ranking::RankingEngine;

/// Public read and trigger operations over the ranking engine.
///
/// At most one ranking pass runs at a time per process.
#[derive(Clone)]
pub struct HotRankingService {
    engine: RankingEngine,
    pass_lock: Arc<Mutex<()>>,
}

impl HotRankingService {
    pub fn new(engine: RankingEngine) -> Self {
        Self {
            engine,
            pass_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn engine(&self) -> &RankingEngine {
        &self.engine
    }

    /// Current hot ranking. Always consults the cache first.
    ///
    /// On a cold start with nothing cached anywhere, a pass is run inline
    /// when `compute_on_cold_miss` is enabled; otherwise the result is empty.
    pub async fn get_top_n(&self) -> Result<Vec<Item>> {
        let lookup = self.engine.cache().get().await;
        if !lookup.is_empty() || !self.engine.config().compute_on_cold_miss {
            return Ok(lookup.into_items());
        }

        let _guard = self.pass_lock.lock().await;
        // A pass may have finished while we waited for the guard.
        if let Some(items) = self.engine.cache().force_get() {
            return Ok(items);
        }

        info!("Ranking cache cold, computing inline");
        let result = self
            .engine
            .compute_top_n(self.engine.config().pass_deadline)
            .await;

        match (result, self.engine.cache().force_get()) {
            (Ok(_), items) => Ok(items.unwrap_or_default()),
            (Err(e), Some(items)) => {
                warn!(error = %e, "Inline ranking pass degraded, serving local snapshot");
                Ok(items)
            }
            (Err(e), None) => Err(e),
        }
    }

    /// Run one ranking pass now. Returns `Busy` if a pass is already running.
    pub async fn trigger_ranking(&self) -> Result<usize> {
        let _guard = self.pass_lock.try_lock().map_err(|_| AppError::Busy)?;
        self.engine
            .compute_top_n(self.engine.config().pass_deadline)
            .await
    }
}

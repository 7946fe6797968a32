//! Hot ranking: decay score, bounded Top-N selection and the paging engine.

mod engine;
mod score;
mod top_n;

pub use engine::RankingEngine;
pub use score::{age_secs, hot_score};
pub use top_n::BoundedTopN;

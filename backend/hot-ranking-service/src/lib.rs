//! Hot content ranking pipeline
//!
//! Interaction events flow from Kafka into per-item counters; a scheduled
//! pass ranks recent posts by decay score and publishes the Top-N through a
//! two-tier cache that readers query.

pub mod cache;
pub mod config;
pub mod consumers;
pub mod counters;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod ranking;
pub mod repository;
pub mod service;
pub mod shutdown;
pub mod worker_pool;

pub use config::Config;
pub use error::{AppError, ErrorClass, Result};
pub use service::HotRankingService;

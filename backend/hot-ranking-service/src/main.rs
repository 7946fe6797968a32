use anyhow::Context;
use hot_ranking::cache::{RankingCache, RedisRankingTier};
use hot_ranking::consumers::{
    ConsumerGroup, DeadLetterReprocessor, HandlerMode, InteractionEventHandler,
    KafkaDeadLetterProducer, PublishEventHandler, ReadEventHandler,
};
use hot_ranking::counters::RedisCounterStore;
use hot_ranking::jobs::start_ranking_job;
use hot_ranking::models::POST_KIND;
use hot_ranking::ranking::RankingEngine;
use hot_ranking::repository::{PgContentRepository, RedisHistoryRepository};
use hot_ranking::worker_pool::TaskPool;
use hot_ranking::{Config, HotRankingService};
use redis_utils::{RedisLock, RedisPool};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    init_tracing(&config.app.log_level, &config.app.log_format);

    info!(env = %config.app.env, "Starting hot-ranking-service");

    // Storage
    let redis = RedisPool::connect(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    redis.ping().await.context("Redis health check failed")?;

    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    info!("Database pool initialized");

    let counters = Arc::new(RedisCounterStore::new(
        redis.manager(),
        RedisLock::new(redis.manager(), config.counters.lock_ttl),
        config.counters.key_ttl,
    ));
    let history = Arc::new(RedisHistoryRepository::new(redis.manager()));
    let content = Arc::new(PgContentRepository::new(db));

    // Ranking
    let cache = RankingCache::new(
        Arc::new(RedisRankingTier::new(redis.manager())),
        config.cache.clone(),
    );
    let engine = RankingEngine::new(
        content.clone(),
        counters.clone(),
        cache,
        config.ranking.clone(),
        POST_KIND,
    );
    let service = HotRankingService::new(engine);

    // Consumers
    let task_pool = TaskPool::new(&config.worker_pool);
    let dead_letters = Arc::new(
        KafkaDeadLetterProducer::new(&config.kafka).context("Failed to create DLQ producer")?,
    );

    let read_handler = Arc::new(
        ReadEventHandler::new(counters.clone(), history.clone(), POST_KIND)
            .with_task_pool(task_pool.handle()),
    );
    let interaction_handler = Arc::new(InteractionEventHandler::new(counters.clone(), POST_KIND));
    let publish_handler = Arc::new(PublishEventHandler::new(content.clone()));

    let kafka = &config.kafka;
    let main_group = ConsumerGroup::new(kafka, &kafka.group_id, dead_letters.clone())
        .context("Failed to create consumer group")?
        .route(
            kafka.read_topic.clone(),
            HandlerMode::Batch {
                handler: read_handler.clone(),
                size: kafka.batch_size,
                timeout: kafka.batch_timeout,
            },
        )
        .route(
            kafka.interaction_topic.clone(),
            HandlerMode::Single(interaction_handler.clone()),
        )
        .route(
            kafka.publish_topic.clone(),
            HandlerMode::Single(publish_handler.clone()),
        );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reprocessor = Arc::new(
        DeadLetterReprocessor::new(config.dead_letter.clone())
            .register(kafka.read_topic.clone(), read_handler)
            .register(kafka.interaction_topic.clone(), interaction_handler)
            .register(kafka.publish_topic.clone(), publish_handler)
            .with_shutdown(shutdown_rx.clone()),
    );
    let mut dlq_group = ConsumerGroup::new(kafka, &kafka.dlq_group_id, dead_letters.clone())
        .context("Failed to create dead-letter consumer group")?;
    for topic in kafka.source_topics() {
        dlq_group = dlq_group.route(
            kafka.dead_letter_topic(topic),
            HandlerMode::Single(reprocessor.clone()),
        );
    }

    // Run
    let main_consumer = tokio::spawn(main_group.run(shutdown_rx.clone()));
    let dlq_consumer = tokio::spawn(dlq_group.run(shutdown_rx.clone()));
    let ranking_job = tokio::spawn(start_ranking_job(
        service,
        config.ranking.interval,
        shutdown_rx,
    ));

    shutdown_signal().await;
    info!("Shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    for (name, handle) in [("consumer", main_consumer), ("dead-letter consumer", dlq_consumer)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, error = %e, "Consumer group exited with error"),
            Err(e) => error!(task = name, error = %e, "Consumer group panicked"),
        }
    }
    if let Err(e) = ranking_job.await {
        error!(error = %e, "Ranking job panicked");
    }

    let failures = task_pool.shutdown().await;
    info!(background_failures = failures, "hot-ranking-service stopped");
    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_thread_ids(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

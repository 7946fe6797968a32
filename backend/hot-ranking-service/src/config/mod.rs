use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub counters: CounterConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub log_level: String,
    /// `json` or `text`
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub dlq_group_id: String,
    pub read_topic: String,
    pub interaction_topic: String,
    pub publish_topic: String,
    /// Appended to a source topic to name its dead-letter topic.
    pub dlq_suffix: String,
    pub batch_size: usize,
    #[serde(with = "duration_millis")]
    pub batch_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub produce_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "hot-ranking-consumer".to_string(),
            dlq_group_id: "hot-ranking-dlq-consumer".to_string(),
            read_topic: "post_read".to_string(),
            interaction_topic: "post_interaction".to_string(),
            publish_topic: "post_publish".to_string(),
            dlq_suffix: "_dlq".to_string(),
            batch_size: 100,
            batch_timeout: Duration::from_secs(1),
            produce_timeout: Duration::from_secs(5),
        }
    }
}

impl KafkaConfig {
    pub fn dead_letter_topic(&self, topic: &str) -> String {
        format!("{}{}", topic, self.dlq_suffix)
    }

    pub fn source_topics(&self) -> [&str; 3] {
        [
            self.read_topic.as_str(),
            self.interaction_topic.as_str(),
            self.publish_topic.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Lock expiration, which is also the maximum wait to acquire it.
    #[serde(with = "duration_millis")]
    pub lock_ttl: Duration,
    /// Sliding expiration refreshed on every mutation.
    #[serde(with = "duration_millis")]
    pub key_ttl: Duration,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            key_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub page_size: usize,
    pub rank_size: usize,
    #[serde(with = "duration_millis")]
    pub horizon: Duration,
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    #[serde(with = "duration_millis")]
    pub pass_deadline: Duration,
    pub compute_on_cold_miss: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            rank_size: 100,
            horizon: Duration::from_secs(7 * 24 * 3600),
            interval: Duration::from_secs(60),
            pass_deadline: Duration::from_secs(5 * 60),
            compute_on_cold_miss: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub key: String,
    #[serde(with = "duration_millis")]
    pub local_ttl: Duration,
    #[serde(with = "duration_millis")]
    pub remote_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key: "hot:post:top".to_string(),
            local_ttl: Duration::from_secs(10 * 60),
            remote_ttl: Duration::from_secs(3 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub base_wait: Duration,
    #[serde(with = "duration_millis")]
    pub max_wait: Duration,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let kafka_defaults = KafkaConfig::default();
        let counter_defaults = CounterConfig::default();
        let ranking_defaults = RankingConfig::default();
        let cache_defaults = CacheConfig::default();
        let dlq_defaults = DeadLetterConfig::default();
        let pool_defaults = WorkerPoolConfig::default();

        let config = Config {
            app: AppConfig {
                env: env_or("APP_ENV", "development"),
                log_level: env_or("LOG_LEVEL", "info"),
                log_format: env_or("LOG_FORMAT", "text"),
            },
            redis: RedisConfig {
                url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .map_err(|_| AppError::Config("DATABASE_URL must be set".to_string()))?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            kafka: KafkaConfig {
                bootstrap_servers: env_or(
                    "KAFKA_BOOTSTRAP_SERVERS",
                    &kafka_defaults.bootstrap_servers,
                ),
                group_id: env_or("KAFKA_GROUP_ID", &kafka_defaults.group_id),
                dlq_group_id: env_or("KAFKA_DLQ_GROUP_ID", &kafka_defaults.dlq_group_id),
                read_topic: env_or("KAFKA_READ_TOPIC", &kafka_defaults.read_topic),
                interaction_topic: env_or(
                    "KAFKA_INTERACTION_TOPIC",
                    &kafka_defaults.interaction_topic,
                ),
                publish_topic: env_or("KAFKA_PUBLISH_TOPIC", &kafka_defaults.publish_topic),
                dlq_suffix: env_or("KAFKA_DLQ_SUFFIX", &kafka_defaults.dlq_suffix),
                batch_size: parse_env("KAFKA_BATCH_SIZE", kafka_defaults.batch_size)?,
                batch_timeout: millis_env("KAFKA_BATCH_TIMEOUT_MS", kafka_defaults.batch_timeout)?,
                produce_timeout: millis_env(
                    "KAFKA_PRODUCE_TIMEOUT_MS",
                    kafka_defaults.produce_timeout,
                )?,
            },
            counters: CounterConfig {
                lock_ttl: millis_env("COUNTER_LOCK_TTL_MS", counter_defaults.lock_ttl)?,
                key_ttl: secs_env("COUNTER_KEY_TTL_SECS", counter_defaults.key_ttl)?,
            },
            ranking: RankingConfig {
                page_size: parse_env("RANKING_PAGE_SIZE", ranking_defaults.page_size)?,
                rank_size: parse_env("RANKING_RANK_SIZE", ranking_defaults.rank_size)?,
                horizon: secs_env("RANKING_HORIZON_SECS", ranking_defaults.horizon)?,
                interval: secs_env("RANKING_INTERVAL_SECS", ranking_defaults.interval)?,
                pass_deadline: secs_env(
                    "RANKING_PASS_DEADLINE_SECS",
                    ranking_defaults.pass_deadline,
                )?,
                compute_on_cold_miss: parse_env(
                    "RANKING_COMPUTE_ON_COLD_MISS",
                    ranking_defaults.compute_on_cold_miss,
                )?,
            },
            cache: CacheConfig {
                key: env_or("RANKING_CACHE_KEY", &cache_defaults.key),
                local_ttl: secs_env("RANKING_LOCAL_TTL_SECS", cache_defaults.local_ttl)?,
                remote_ttl: secs_env("RANKING_REMOTE_TTL_SECS", cache_defaults.remote_ttl)?,
            },
            dead_letter: DeadLetterConfig {
                max_retries: parse_env("DLQ_MAX_RETRIES", dlq_defaults.max_retries)?,
                base_wait: millis_env("DLQ_BASE_WAIT_MS", dlq_defaults.base_wait)?,
                max_wait: millis_env("DLQ_MAX_WAIT_MS", dlq_defaults.max_wait)?,
            },
            worker_pool: WorkerPoolConfig {
                workers: parse_env("WORKER_POOL_SIZE", pool_defaults.workers)?,
                queue_capacity: parse_env("WORKER_POOL_QUEUE", pool_defaults.queue_capacity)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.kafka.batch_size > 0, "KAFKA_BATCH_SIZE must be > 0"),
            (self.ranking.page_size > 0, "RANKING_PAGE_SIZE must be > 0"),
            (self.ranking.rank_size > 0, "RANKING_RANK_SIZE must be > 0"),
            (
                !self.ranking.interval.is_zero(),
                "RANKING_INTERVAL_SECS must be > 0",
            ),
            (
                !self.ranking.pass_deadline.is_zero(),
                "RANKING_PASS_DEADLINE_SECS must be > 0",
            ),
            (
                self.counters.lock_ttl.as_millis() > 0,
                "COUNTER_LOCK_TTL_MS must be > 0",
            ),
            (
                self.counters.key_ttl.as_secs() > 0,
                "COUNTER_KEY_TTL_SECS must be > 0",
            ),
            (self.dead_letter.max_retries > 0, "DLQ_MAX_RETRIES must be > 0"),
            (self.worker_pool.workers > 0, "WORKER_POOL_SIZE must be > 0"),
            (self.worker_pool.queue_capacity > 0, "WORKER_POOL_QUEUE must be > 0"),
            (!self.kafka.dlq_suffix.is_empty(), "KAFKA_DLQ_SUFFIX must not be empty"),
        ];

        for (ok, message) in checks {
            if !ok {
                return Err(AppError::Config(message.to_string()));
            }
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn millis_env(key: &str, default: Duration) -> Result<Duration> {
    parse_env(key, default.as_millis() as u64).map(Duration::from_millis)
}

fn secs_env(key: &str, default: Duration) -> Result<Duration> {
    parse_env(key, default.as_secs()).map(Duration::from_secs)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

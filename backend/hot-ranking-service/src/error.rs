use redis_utils::LockError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Ranking pass already in progress")]
    Busy,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Worker pool is full")]
    Overloaded,

    #[error("Interrupted by shutdown")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error taxonomy that drives consumer and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Cache/broker/database unreachable or slow.
    Transient,
    /// Payload cannot be decoded. Never retried.
    Malformed,
    /// Payload decoded but violates a business rule. Eligible for dead-lettering.
    Business,
    /// A collaborator operation that is not wired up.
    NotImplemented,
    Internal,
}

impl AppError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::Redis(_)
            | AppError::Lock(_)
            | AppError::Kafka(_)
            | AppError::Database(_)
            | AppError::Timeout(_)
            | AppError::Busy
            | AppError::Overloaded
            | AppError::Cancelled => ErrorClass::Transient,
            AppError::Malformed(_) => ErrorClass::Malformed,
            AppError::Validation(_) | AppError::NotFound(_) => ErrorClass::Business,
            AppError::NotImplemented(_) => ErrorClass::NotImplemented,
            AppError::Serialization(_) | AppError::Config(_) | AppError::Internal(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Short label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self.class() {
            ErrorClass::Transient => "transient",
            ErrorClass::Malformed => "malformed",
            ErrorClass::Business => "business",
            ErrorClass::NotImplemented => "not_implemented",
            ErrorClass::Internal => "internal",
        }
    }

    pub fn malformed(err: impl std::fmt::Display) -> Self {
        AppError::Malformed(err.to_string())
    }
}

use crate::models::ContentId;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout(_))
    }
}

/// Malformed input, rejected before any state changes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("metric `{field}` must not be negative (got {value})")]
    NegativeMetric { field: &'static str, value: i64 },

    #[error("event carries no engagement metrics")]
    NoMetrics,

    #[error("content type for content {0} is unknown")]
    UnknownContentType(ContentId),

    #[error("no engagement has been recorded for content {0}")]
    UnknownContent(ContentId),

    #[error("rating {rating} is outside 1..={max}")]
    RatingOutOfRange { rating: i32, max: i32 },

    #[error("no candidate platforms were supplied")]
    EmptyCandidates,

    #[error("horizon of {0} hours is outside 1..=672")]
    InvalidHorizon(u32),
}

/// Failures of the persistence collaborators.
///
/// `Conflict` and `Unavailable` never reach callers directly: the store retries
/// them and converts exhaustion into `EngineError::Store`.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("version conflict")]
    Conflict,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("serialization: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(msg) => EngineError::Serialization(msg),
            other => EngineError::Store(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

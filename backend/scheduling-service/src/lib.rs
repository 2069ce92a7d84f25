pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;

pub use config::EngineConfig;
pub use error::{EngineError, Result, StoreError, ValidationError};
pub use models::{
    ContentId, ContentType, EngagementObservation, FeedbackEvent, ModelKey, Platform,
    PreferenceEntry, PreferenceModel, RankedSlot, RawEngagementEvent, RecommendationRequest,
    SchedulingRecommendation, TimeBucket, UserId,
};
pub use services::{
    AggregateSnapshot, ContentCatalog, FallbackPolicy, FeedbackAck, FeedbackLoopEngine,
    IngestStatus, Ingested, Insights, StaticContentCatalog, TrendWindow,
};

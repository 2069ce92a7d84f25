pub mod analytics;
pub mod engine;
pub mod fallback;
pub mod ingest;
pub mod scheduler;
pub mod store;
pub mod updater;

pub use analytics::{AggregateSnapshot, AnalyticsAggregator, Insights, TrendWindow};
pub use engine::{FeedbackAck, FeedbackLoopEngine, IngestStatus, Ingested};
pub use fallback::{FallbackPolicy, FallbackSlot};
pub use ingest::{ContentCatalog, ObservationIngestor, StaticContentCatalog};
pub use scheduler::RecommendationGenerator;
pub use store::{HistoryRepository, ModelRepository, PreferenceStore};
pub use updater::{FeedbackSignal, ModelUpdater};

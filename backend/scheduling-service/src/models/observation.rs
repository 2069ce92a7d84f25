use super::{ContentId, ContentType, ModelKey, Platform, TimeBucket, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engagement event as delivered by the surrounding platform.
///
/// Every field is optional here; the ingestor decides what is required.
/// Metrics are signed so that negative values can be reported as invalid
/// rather than failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEngagementEvent {
    #[serde(default)]
    pub observation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub content_id: Option<ContentId>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub views: Option<i64>,
    #[serde(default)]
    pub likes: Option<i64>,
    #[serde(default)]
    pub comments: Option<i64>,
    #[serde(default)]
    pub shares: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Canonical, immutable engagement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementObservation {
    pub observation_id: String,
    pub user_id: UserId,
    pub content_id: ContentId,
    pub platform: Platform,
    pub content_type: ContentType,
    pub published_at: DateTime<Utc>,
    pub time_bucket: TimeBucket,
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    /// (likes + comments + shares) / max(views, 1)
    pub engagement_rate: f64,
    /// Normalized characteristic tags (sorted, lower-case, unique)
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EngagementObservation {
    pub fn interactions(&self) -> u64 {
        self.likes
            .saturating_add(self.comments)
            .saturating_add(self.shares)
    }

    pub fn model_key(&self) -> ModelKey {
        ModelKey::new(
            self.platform.clone(),
            self.content_type.clone(),
            self.time_bucket,
        )
    }
}

/// Explicit user rating of a published content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub event_id: String,
    pub user_id: UserId,
    pub content_id: ContentId,
    pub rating: i32,
    pub submitted_at: DateTime<Utc>,
}

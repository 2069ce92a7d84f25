use super::{ContentId, ContentType, Platform, TimeBucket, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Parameters of a single `recommend` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub content_id: Option<ContentId>,
    pub content_type: ContentType,
    /// Empty means "use the configured default platforms"
    #[serde(default)]
    pub candidate_platforms: Vec<Platform>,
    /// How far ahead slots may be scheduled, in hours
    pub horizon_hours: u32,
    /// Maximum ranked entries; never fewer than 7 are returned when available
    #[serde(default)]
    pub limit: Option<usize>,
    /// Caller deadline; the configured default applies when absent
    #[serde(skip)]
    pub deadline: Option<Duration>,
}

impl RecommendationRequest {
    pub fn new(user_id: UserId, content_type: ContentType, horizon_hours: u32) -> Self {
        Self {
            user_id,
            content_id: None,
            content_type,
            candidate_platforms: Vec::new(),
            horizon_hours,
            limit: None,
            deadline: None,
        }
    }

    pub fn with_content(mut self, content_id: ContentId) -> Self {
        self.content_id = Some(content_id);
        self
    }

    pub fn with_platforms<I, P>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Platform>,
    {
        self.candidate_platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One ranked `(platform, time_slot, content_type)` option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSlot {
    /// 1-based position in the ranking
    pub rank: u32,
    pub platform: Platform,
    pub content_type: ContentType,
    pub time_bucket: TimeBucket,
    /// Concrete next occurrence of the bucket inside the horizon
    pub time_slot: DateTime<Utc>,
    /// Learned (or prior) weight of the slot
    pub expected_score: f64,
    /// Upper-confidence-bound bonus added for ranking
    pub exploration_bonus: f64,
    pub sample_count: u64,
    /// Evidence backing this slot, in [0, 1]
    pub confidence: f64,
}

impl RankedSlot {
    pub fn ranking_score(&self) -> f64 {
        self.expected_score + self.exploration_bonus
    }
}

/// Immutable output of the recommendation generator.
///
/// Identical inputs against an unchanged model at the same clock reading
/// produce an identical value, including `recommendation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingRecommendation {
    pub recommendation_id: Uuid,
    pub user_id: UserId,
    pub content_id: Option<ContentId>,
    pub slots: Vec<RankedSlot>,
    pub reasoning_text: String,
    /// True when industry defaults replaced the learned model
    pub fallback_used: bool,
    /// Version of the preference model the ranking was computed from
    pub model_version: u64,
    pub generated_at: DateTime<Utc>,
}

impl SchedulingRecommendation {
    pub fn top(&self) -> Option<&RankedSlot> {
        self.slots.first()
    }
}

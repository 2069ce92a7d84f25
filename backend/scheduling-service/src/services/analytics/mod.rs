// ============================================
// Analytics Aggregator (互動數據分析)
// ============================================
//
// Rolling statistics over a user's observation history:
// - mean engagement rate per (platform, content_type) and top-N pairs
// - cross-platform comparison table
// - top-N characteristic tags
// - engagement trend slope over a recent window
//
// Snapshots are a cache, never a source of truth. The per-user accumulator
// is updated incrementally on ingestion and can be rebuilt from history at
// any time with identical results.

pub mod accumulator;

pub use accumulator::{AggregateAccumulator, RateStats, TrendWindow};

use crate::config::AnalyticsConfig;
use crate::models::{ContentId, ContentType, EngagementObservation, Platform, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStats {
    pub platform: Platform,
    pub content_type: ContentType,
    pub observation_count: u64,
    pub mean_engagement_rate: f64,
    pub total_views: u64,
    pub total_interactions: u64,
}

/// One row of the cross-platform comparison table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformComparison {
    pub platform: Platform,
    pub observation_count: u64,
    pub mean_engagement_rate: f64,
    pub total_views: u64,
    pub total_interactions: u64,
    /// Content type with the highest mean engagement on this platform
    pub best_content_type: Option<ContentType>,
    pub share_of_observations: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPerformance {
    pub tag: String,
    pub observation_count: u64,
    pub mean_engagement_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Stable,
    Declining,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementTrend {
    /// Change of engagement rate per observation
    pub slope: f64,
    pub direction: TrendDirection,
    pub window_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub user_id: UserId,
    /// Set when the snapshot is restricted to one content item
    pub content_id: Option<ContentId>,
    pub observation_count: u64,
    pub mean_engagement_rate: f64,
    pub total_views: u64,
    pub total_interactions: u64,
    /// Every observed (platform, content_type) pair, in key order
    pub pair_stats: Vec<PairStats>,
    pub top_pairs: Vec<PairStats>,
    pub platform_comparison: Vec<PlatformComparison>,
    pub top_tags: Vec<TagPerformance>,
    /// `None` with fewer than two observations in the window
    pub trend: Option<EngagementTrend>,
    pub latest_observation_at: Option<DateTime<Utc>>,
}

/// Result of an insight request; empty history is a normal outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Insights {
    Ready(AggregateSnapshot),
    InsufficientData {
        user_id: UserId,
        content_id: Option<ContentId>,
        observation_count: u64,
    },
}

impl Insights {
    pub fn snapshot(&self) -> Option<&AggregateSnapshot> {
        match self {
            Insights::Ready(snapshot) => Some(snapshot),
            Insights::InsufficientData { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Insights::Ready(_))
    }
}

pub struct AnalyticsAggregator {
    config: AnalyticsConfig,
    cache: DashMap<UserId, AggregateAccumulator>,
}

impl AnalyticsAggregator {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    pub fn default_window(&self) -> TrendWindow {
        TrendWindow::LastObservations(self.config.trend_window)
    }

    /// Pure computation over an explicit observation set
    pub fn compute(
        &self,
        user_id: UserId,
        content_id: Option<ContentId>,
        observations: &[EngagementObservation],
        window: TrendWindow,
    ) -> Insights {
        AggregateAccumulator::from_history(window, observations).insights(
            user_id,
            content_id,
            self.config.top_n,
            self.config.stable_slope_epsilon,
        )
    }

    /// Fold a freshly ingested observation into the cached accumulator, if any.
    ///
    /// Users without a cached accumulator are left alone; their first insight
    /// request rebuilds from history.
    pub fn record(&self, observation: &EngagementObservation) {
        if let Some(mut accumulator) = self.cache.get_mut(&observation.user_id) {
            accumulator.record(observation);
        }
    }

    /// Replace the cached accumulator of a user with one built from `history`
    pub fn rebuild(&self, user_id: UserId, history: &[EngagementObservation]) -> Insights {
        let accumulator = AggregateAccumulator::from_history(self.default_window(), history);
        let insights = accumulator.insights(
            user_id,
            None,
            self.config.top_n,
            self.config.stable_slope_epsilon,
        );
        debug!(
            user_id = %user_id,
            observations = accumulator.observation_count(),
            "Rebuilt aggregate snapshot"
        );
        self.cache.insert(user_id, accumulator);
        insights
    }

    pub fn cached(&self, user_id: UserId) -> Option<Insights> {
        self.cache.get(&user_id).map(|accumulator| {
            accumulator.insights(
                user_id,
                None,
                self.config.top_n,
                self.config.stable_slope_epsilon,
            )
        })
    }

    pub fn forget(&self, user_id: UserId) {
        self.cache.remove(&user_id);
    }

    pub fn cached_users(&self) -> usize {
        self.cache.len()
    }
}

use super::{
    AggregateSnapshot, EngagementTrend, Insights, PairStats, PlatformComparison, TagPerformance,
    TrendDirection,
};
use crate::models::{ContentId, ContentType, EngagementObservation, Platform, UserId};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Which observations feed the trend slope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendWindow {
    /// The N most recent observations by publication time
    LastObservations(usize),
    /// Observations published within this span of the latest one
    Within(Duration),
}

/// Running totals for one grouping.
///
/// Rates are summed as integer micro-units so the totals do not depend on the
/// order observations were added in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateStats {
    pub count: u64,
    rate_micros: u128,
    pub views: u64,
    pub interactions: u64,
}

impl RateStats {
    fn add(&mut self, observation: &EngagementObservation) {
        self.count += 1;
        self.rate_micros = self
            .rate_micros
            .saturating_add(to_micros(observation.engagement_rate));
        self.views = self.views.saturating_add(observation.views);
        self.interactions = self.interactions.saturating_add(observation.interactions());
    }

    pub fn mean_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.rate_micros as f64 / 1_000_000.0 / self.count as f64
        }
    }
}

fn to_micros(rate: f64) -> u128 {
    if rate.is_finite() && rate > 0.0 {
        (rate * 1_000_000.0).round() as u128
    } else {
        0
    }
}

/// Incrementally maintained statistics of one observation set.
///
/// `record` is idempotent per observation id and commutative, so folding a
/// history in any order (or all at once) yields the same snapshot.
#[derive(Debug, Clone)]
pub struct AggregateAccumulator {
    window: TrendWindow,
    seen: HashSet<String>,
    total: RateStats,
    pairs: BTreeMap<(Platform, ContentType), RateStats>,
    platforms: BTreeMap<Platform, RateStats>,
    tags: BTreeMap<String, RateStats>,
    recent: BTreeMap<(DateTime<Utc>, String), f64>,
    latest: Option<DateTime<Utc>>,
}

impl AggregateAccumulator {
    pub fn new(window: TrendWindow) -> Self {
        Self {
            window,
            seen: HashSet::new(),
            total: RateStats::default(),
            pairs: BTreeMap::new(),
            platforms: BTreeMap::new(),
            tags: BTreeMap::new(),
            recent: BTreeMap::new(),
            latest: None,
        }
    }

    pub fn from_history(window: TrendWindow, observations: &[EngagementObservation]) -> Self {
        let mut accumulator = Self::new(window);
        for observation in observations {
            accumulator.record(observation);
        }
        accumulator
    }

    pub fn window(&self) -> TrendWindow {
        self.window
    }

    pub fn observation_count(&self) -> u64 {
        self.total.count
    }

    /// Returns `false` when the observation was already counted
    pub fn record(&mut self, observation: &EngagementObservation) -> bool {
        if !self.seen.insert(observation.observation_id.clone()) {
            return false;
        }

        self.total.add(observation);
        self.pairs
            .entry((observation.platform.clone(), observation.content_type.clone()))
            .or_default()
            .add(observation);
        self.platforms
            .entry(observation.platform.clone())
            .or_default()
            .add(observation);
        for tag in &observation.tags {
            self.tags.entry(tag.clone()).or_default().add(observation);
        }

        self.admit_recent(observation);
        true
    }

    fn admit_recent(&mut self, observation: &EngagementObservation) {
        let latest = match self.latest {
            Some(latest) if latest >= observation.published_at => latest,
            _ => observation.published_at,
        };
        self.latest = Some(latest);

        let key = (observation.published_at, observation.observation_id.clone());
        match self.window {
            TrendWindow::LastObservations(size) => {
                self.recent.insert(key, observation.engagement_rate);
                while self.recent.len() > size {
                    self.recent.pop_first();
                }
            }
            TrendWindow::Within(span) => {
                let cutoff = latest - span;
                if observation.published_at >= cutoff {
                    self.recent.insert(key, observation.engagement_rate);
                }
                self.recent.retain(|(published_at, _), _| *published_at >= cutoff);
            }
        }
    }

    /// Least-squares slope of engagement rate over the window, per observation
    fn trend(&self, stable_epsilon: f64) -> Option<EngagementTrend> {
        let rates: Vec<f64> = self.recent.values().copied().collect();
        let size = rates.len();
        if size < 2 {
            return None;
        }

        let mean_x = (size - 1) as f64 / 2.0;
        let mean_y = rates.iter().sum::<f64>() / size as f64;
        let (numerator, denominator) =
            rates
                .iter()
                .enumerate()
                .fold((0.0, 0.0), |(num, den), (i, rate)| {
                    let dx = i as f64 - mean_x;
                    (num + dx * (rate - mean_y), den + dx * dx)
                });
        let slope = numerator / denominator;

        let direction = if slope.abs() <= stable_epsilon {
            TrendDirection::Stable
        } else if slope > 0.0 {
            TrendDirection::Rising
        } else {
            TrendDirection::Declining
        };

        Some(EngagementTrend {
            slope,
            direction,
            window_size: size,
        })
    }

    pub fn insights(
        &self,
        user_id: UserId,
        content_id: Option<ContentId>,
        top_n: usize,
        stable_epsilon: f64,
    ) -> Insights {
        if self.total.count == 0 {
            return Insights::InsufficientData {
                user_id,
                content_id,
                observation_count: 0,
            };
        }

        let pair_stats: Vec<PairStats> = self
            .pairs
            .iter()
            .map(|((platform, content_type), stats)| PairStats {
                platform: platform.clone(),
                content_type: content_type.clone(),
                observation_count: stats.count,
                mean_engagement_rate: stats.mean_rate(),
                total_views: stats.views,
                total_interactions: stats.interactions,
            })
            .collect();

        let mut top_pairs = pair_stats.clone();
        top_pairs.sort_by(|a, b| {
            by_mean_then_count(
                (a.mean_engagement_rate, a.observation_count),
                (b.mean_engagement_rate, b.observation_count),
            )
            .then_with(|| a.platform.cmp(&b.platform))
            .then_with(|| a.content_type.cmp(&b.content_type))
        });
        top_pairs.truncate(top_n);

        let platform_comparison = self
            .platforms
            .iter()
            .map(|(platform, stats)| PlatformComparison {
                platform: platform.clone(),
                observation_count: stats.count,
                mean_engagement_rate: stats.mean_rate(),
                total_views: stats.views,
                total_interactions: stats.interactions,
                best_content_type: pair_stats
                    .iter()
                    .filter(|pair| &pair.platform == platform)
                    .min_by(|a, b| {
                        by_mean_then_count(
                            (a.mean_engagement_rate, a.observation_count),
                            (b.mean_engagement_rate, b.observation_count),
                        )
                        .then_with(|| a.content_type.cmp(&b.content_type))
                    })
                    .map(|pair| pair.content_type.clone()),
                share_of_observations: stats.count as f64 / self.total.count as f64,
            })
            .collect();

        let mut top_tags: Vec<TagPerformance> = self
            .tags
            .iter()
            .map(|(tag, stats)| TagPerformance {
                tag: tag.clone(),
                observation_count: stats.count,
                mean_engagement_rate: stats.mean_rate(),
            })
            .collect();
        top_tags.sort_by(|a, b| {
            by_mean_then_count(
                (a.mean_engagement_rate, a.observation_count),
                (b.mean_engagement_rate, b.observation_count),
            )
            .then_with(|| a.tag.cmp(&b.tag))
        });
        top_tags.truncate(top_n);

        Insights::Ready(AggregateSnapshot {
            user_id,
            content_id,
            observation_count: self.total.count,
            mean_engagement_rate: self.total.mean_rate(),
            total_views: self.total.views,
            total_interactions: self.total.interactions,
            pair_stats,
            top_pairs,
            platform_comparison,
            top_tags,
            trend: self.trend(stable_epsilon),
            latest_observation_at: self.latest,
        })
    }
}

// Higher mean first, then more observations
fn by_mean_then_count(a: (f64, u64), b: (f64, u64)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| b.1.cmp(&a.1))
}

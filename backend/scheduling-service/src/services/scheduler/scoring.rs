// ============================================
// UCB (Upper Confidence Bound) Slot Scoring
// ============================================
//
// Exploration-adjusted score of a (platform, time bucket, content type) slot:
//   score = weight + beta * sqrt(ln(N + 1) / (n + 1))
//
// Where:
//   - weight: learned (or prior) preference weight in [0, 1]
//   - beta: exploration coefficient
//   - N: total samples across the user's model
//   - n: samples of this slot
//
// Under-sampled but plausible slots get a bonus that shrinks as evidence
// accumulates, so early data cannot lock the ranking in.

use crate::config::{ExplorationConfig, RecommendationConfig};
use crate::models::{ContentType, Platform, TimeBucket};
use crate::utils::unit_clamp;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct SlotScorer {
    /// Exploration coefficient (beta)
    beta: f64,
    confidence_half_count: f64,
    variance_penalty: f64,
}

impl SlotScorer {
    pub fn new(exploration: &ExplorationConfig, recommendation: &RecommendationConfig) -> Self {
        Self {
            beta: exploration.beta,
            confidence_half_count: recommendation.confidence_half_count,
            variance_penalty: recommendation.variance_penalty,
        }
    }

    pub fn exploration_bonus(&self, sample_count: u64, total_samples: u64) -> f64 {
        self.beta * ((total_samples as f64 + 1.0).ln() / (sample_count as f64 + 1.0)).sqrt()
    }

    /// Evidence `n / (n + half_count)` damped by variance, in [0, 1]
    pub fn confidence(&self, sample_count: u64, variance_estimate: f64) -> f64 {
        let n = sample_count as f64;
        let evidence = n / (n + self.confidence_half_count);
        let stability = 1.0 / (1.0 + variance_estimate.max(0.0) * self.variance_penalty);
        unit_clamp(evidence * stability)
    }
}

/// A candidate slot with everything needed to rank and render it
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub platform: Platform,
    pub content_type: ContentType,
    pub time_bucket: TimeBucket,
    pub time_slot: DateTime<Utc>,
    pub weight: f64,
    pub exploration_bonus: f64,
    pub sample_count: u64,
    pub confidence: f64,
    /// Position in the default ranking of its content type, if listed
    pub fallback_position: Option<usize>,
}

impl ScoredCandidate {
    pub fn score(&self) -> f64 {
        self.weight + self.exploration_bonus
    }
}

/// Score desc, then better evidenced, then platform name, time, content type
pub fn compare_learned(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| b.sample_count.cmp(&a.sample_count))
        .then_with(|| a.platform.cmp(&b.platform))
        .then_with(|| a.time_slot.cmp(&b.time_slot))
        .then_with(|| a.content_type.cmp(&b.content_type))
}

/// Default-ranking order first, unlisted slots after by prior and name
pub fn compare_fallback(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    let position = |c: &ScoredCandidate| c.fallback_position.unwrap_or(usize::MAX);
    position(a)
        .cmp(&position(b))
        .then_with(|| b.weight.total_cmp(&a.weight))
        .then_with(|| a.platform.cmp(&b.platform))
        .then_with(|| a.time_slot.cmp(&b.time_slot))
        .then_with(|| a.content_type.cmp(&b.content_type))
}

// ============================================
// Recommendation Generator (發佈時段推薦)
// ============================================
//
// Pipeline:
// 1. Expand (platform, time bucket) candidates inside the horizon, keeping
//    only platforms compatible with the content type
// 2. Score each candidate with UCB over the user's preference model
// 3. Rank by score, tie-breaking on evidence, then platform name
// 4. Below `min_observations` total samples, the default ranking of the
//    fallback policy replaces the learned one and confidence is capped
//
// Output is a pure function of (model, request, now): no randomness, and the
// recommendation id is derived from the inputs.

pub mod calendar;
pub mod scoring;

pub use calendar::{candidate_slots, day_windows, next_full_hour, CandidateSlot};
pub use scoring::{compare_fallback, compare_learned, ScoredCandidate, SlotScorer};

use crate::config::{ExplorationConfig, RecommendationConfig};
use crate::error::ValidationError;
use crate::models::{
    ContentType, ModelKey, Platform, PreferenceModel, RankedSlot, RecommendationRequest,
    SchedulingRecommendation,
};
use crate::services::fallback::FallbackPolicy;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Four weeks
pub const MAX_HORIZON_HOURS: u32 = 672;

/// Ranked entries returned whenever that many valid candidates exist
pub const MIN_RANKED_ENTRIES: usize = 7;

const RECOMMENDATION_NAMESPACE: Uuid = Uuid::from_u128(0x9a41_7c3e_5b02_4f8d_b6e1_2d7f_0c93_e5a6);

pub struct RecommendationGenerator {
    config: RecommendationConfig,
    scorer: SlotScorer,
    fallback: Arc<FallbackPolicy>,
}

impl RecommendationGenerator {
    pub fn new(
        config: RecommendationConfig,
        exploration: &ExplorationConfig,
        fallback: Arc<FallbackPolicy>,
    ) -> Self {
        let scorer = SlotScorer::new(exploration, &config);
        Self {
            config,
            scorer,
            fallback,
        }
    }

    /// Rank slots for one content item against a model snapshot
    pub fn recommend(
        &self,
        model: &PreferenceModel,
        request: &RecommendationRequest,
        now: DateTime<Utc>,
    ) -> Result<SchedulingRecommendation, ValidationError> {
        if request.horizon_hours == 0 || request.horizon_hours > MAX_HORIZON_HOURS {
            return Err(ValidationError::InvalidHorizon(request.horizon_hours));
        }
        let platforms = self.resolve_platforms(&request.candidate_platforms)?;
        let window = candidate_slots(next_full_hour(now), request.horizon_hours);
        let fallback_used = self.uses_fallback(model);

        let mut candidates =
            self.score_candidates(model, &request.content_type, &platforms, &window, fallback_used);
        sort_candidates(&mut candidates, fallback_used);

        let available = candidates.len();
        let limit = request
            .limit
            .unwrap_or(self.config.max_ranked_entries)
            .max(MIN_RANKED_ENTRIES);
        candidates.truncate(limit);
        let slots = into_ranked(candidates);

        debug!(
            user_id = %request.user_id,
            content_type = %request.content_type,
            available,
            returned = slots.len(),
            fallback_used,
            "Candidates ranked"
        );

        let reasoning_text = self.reasoning(
            model,
            &slots,
            fallback_used,
            &request.content_type,
            request.horizon_hours,
        );

        let platform_names: Vec<&str> = platforms.iter().map(Platform::as_str).collect();
        let recommendation_id = derive_id(&[
            request.user_id.to_string(),
            request
                .content_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            request.content_type.to_string(),
            platform_names.join(","),
            request.horizon_hours.to_string(),
            limit.to_string(),
            model.version.to_string(),
            now.to_rfc3339(),
        ]);

        info!(
            user_id = %request.user_id,
            recommendation_id = %recommendation_id,
            slots = slots.len(),
            fallback_used,
            "Scheduling recommendation generated"
        );

        Ok(SchedulingRecommendation {
            recommendation_id,
            user_id: request.user_id,
            content_id: request.content_id,
            slots,
            reasoning_text,
            fallback_used,
            model_version: model.version,
            generated_at: now,
        })
    }

    /// One recommendation per rolling day over the next week.
    ///
    /// Content types come from the model (or `general` for a new user); the
    /// best `calendar_slots_per_day` distinct (platform, time) slots of each
    /// day are kept. Days without any valid candidate are omitted.
    pub fn weekly_calendar(
        &self,
        model: &PreferenceModel,
        now: DateTime<Utc>,
    ) -> Result<Vec<SchedulingRecommendation>, ValidationError> {
        let platforms = self.resolve_platforms(&[])?;
        let mut content_types: Vec<ContentType> = model.content_types().into_iter().collect();
        if content_types.is_empty() {
            content_types.push(ContentType::general());
        }
        let fallback_used = self.uses_fallback(model);

        let mut calendar = Vec::new();
        for (day, window) in day_windows(now) {
            let mut candidates: Vec<ScoredCandidate> = content_types
                .iter()
                .flat_map(|content_type| {
                    self.score_candidates(model, content_type, &platforms, &window, fallback_used)
                })
                .collect();
            sort_candidates(&mut candidates, fallback_used);

            let mut taken = HashSet::new();
            candidates.retain(|c| taken.insert((c.platform.clone(), c.time_slot)));
            candidates.truncate(self.config.calendar_slots_per_day);
            if candidates.is_empty() {
                continue;
            }

            let slots = into_ranked(candidates);
            let label = slots[0].content_type.clone();
            let reasoning_text =
                self.reasoning(model, &slots, fallback_used, &label, calendar::HOURS_PER_DAY);

            let recommendation_id = derive_id(&[
                model.user_id.to_string(),
                "calendar".to_string(),
                day.to_string(),
                model.version.to_string(),
                now.to_rfc3339(),
            ]);

            calendar.push(SchedulingRecommendation {
                recommendation_id,
                user_id: model.user_id,
                content_id: None,
                slots,
                reasoning_text,
                fallback_used,
                model_version: model.version,
                generated_at: now,
            });
        }

        info!(
            user_id = %model.user_id,
            days = calendar.len(),
            fallback_used,
            "Weekly calendar generated"
        );
        Ok(calendar)
    }

    pub fn uses_fallback(&self, model: &PreferenceModel) -> bool {
        model.total_samples() < self.config.min_observations
    }

    /// Platforms absent from the compatibility table accept every content type
    pub fn is_compatible(&self, platform: &Platform, content_type: &ContentType) -> bool {
        self.config
            .platform_content_types
            .get(platform)
            .map_or(true, |types| types.contains(content_type))
    }

    fn resolve_platforms(&self, requested: &[Platform]) -> Result<Vec<Platform>, ValidationError> {
        let source: &[Platform] = if requested.is_empty() {
            &self.config.default_platforms
        } else {
            requested
        };

        let mut platforms: Vec<Platform> = source
            .iter()
            .filter(|platform| !platform.is_empty())
            .cloned()
            .collect();
        platforms.sort();
        platforms.dedup();

        if platforms.is_empty() {
            return Err(ValidationError::EmptyCandidates);
        }
        Ok(platforms)
    }

    fn score_candidates(
        &self,
        model: &PreferenceModel,
        content_type: &ContentType,
        platforms: &[Platform],
        window: &[CandidateSlot],
        fallback_used: bool,
    ) -> Vec<ScoredCandidate> {
        let total_samples = model.total_samples();
        let ranking = self.fallback.ranking(content_type);
        let ceiling = self.config.fallback_confidence_ceiling;

        let mut candidates = Vec::new();
        for platform in platforms
            .iter()
            .filter(|platform| self.is_compatible(platform, content_type))
        {
            for slot in window {
                let fallback_position = ranking.iter().position(|default| {
                    &default.platform == platform && default.time_bucket == slot.time_bucket
                });
                let prior = self.fallback.prior_at(fallback_position);

                let key = ModelKey::new(platform.clone(), content_type.clone(), slot.time_bucket);
                let (learned_weight, sample_count, variance) = match model.entry(&key) {
                    Some(entry) => (entry.weight, entry.sample_count, entry.variance_estimate),
                    None => (prior, 0, self.fallback.prior_variance()),
                };
                let confidence = self.scorer.confidence(sample_count, variance);

                let candidate = if fallback_used {
                    ScoredCandidate {
                        platform: platform.clone(),
                        content_type: content_type.clone(),
                        time_bucket: slot.time_bucket,
                        time_slot: slot.time_slot,
                        weight: prior,
                        exploration_bonus: 0.0,
                        sample_count,
                        confidence: confidence.min(ceiling),
                        fallback_position,
                    }
                } else {
                    ScoredCandidate {
                        platform: platform.clone(),
                        content_type: content_type.clone(),
                        time_bucket: slot.time_bucket,
                        time_slot: slot.time_slot,
                        weight: learned_weight,
                        exploration_bonus: self
                            .scorer
                            .exploration_bonus(sample_count, total_samples),
                        sample_count,
                        confidence,
                        fallback_position,
                    }
                };
                candidates.push(candidate);
            }
        }
        candidates
    }

    fn reasoning(
        &self,
        model: &PreferenceModel,
        slots: &[RankedSlot],
        fallback_used: bool,
        content_type: &ContentType,
        horizon_hours: u32,
    ) -> String {
        let Some(top) = slots.first() else {
            return format!(
                "No compatible slots for {} content within the next {} hours; nothing was ranked.",
                content_type, horizon_hours
            );
        };

        if fallback_used {
            return format!(
                "Industry defaults for {} content: {} of {} observations needed for a personalized \
                 ranking have been recorded. Top pick {} on {} follows the default ranking \
                 (confidence capped at {:.2}).",
                top.content_type,
                model.total_samples(),
                self.config.min_observations,
                top.platform,
                top.time_bucket,
                self.config.fallback_confidence_ceiling
            );
        }

        let rationale = if top.sample_count == 0 || top.exploration_bonus > top.expected_score {
            "exploration: the slot is under-sampled and its bonus carries the ranking"
        } else {
            "exploitation: the learned weight dominates the score"
        };
        format!(
            "Top pick {} on {} for {} content: learned weight {:.3} from {} observations plus \
             exploration bonus {:.3} (confidence {:.2}). Ranked by {}.",
            top.platform,
            top.time_bucket,
            top.content_type,
            top.expected_score,
            top.sample_count,
            top.exploration_bonus,
            top.confidence,
            rationale
        )
    }
}

fn sort_candidates(candidates: &mut [ScoredCandidate], fallback_used: bool) {
    if fallback_used {
        candidates.sort_by(compare_fallback);
    } else {
        candidates.sort_by(compare_learned);
    }
}

fn into_ranked(candidates: Vec<ScoredCandidate>) -> Vec<RankedSlot> {
    candidates
        .into_iter()
        .enumerate()
        .map(|(i, candidate)| RankedSlot {
            rank: i as u32 + 1,
            platform: candidate.platform,
            content_type: candidate.content_type,
            time_bucket: candidate.time_bucket,
            time_slot: candidate.time_slot,
            expected_score: candidate.weight,
            exploration_bonus: candidate.exploration_bonus,
            sample_count: candidate.sample_count,
            confidence: candidate.confidence,
        })
        .collect()
}

fn derive_id(parts: &[String]) -> Uuid {
    Uuid::new_v5(&RECOMMENDATION_NAMESPACE, parts.join("|").as_bytes())
}

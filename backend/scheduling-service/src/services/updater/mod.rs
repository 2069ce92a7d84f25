// ============================================
// Model Updater (反饋迴路更新器)
// ============================================
//
// Folds one signal into the matching (platform, content_type, time_bucket)
// entry of a preference model:
//
//   alpha     = min(1, max(alpha_min, 1 / (n + 1)) * rate_multiplier)
//   w'        = w + alpha * (x - w)
//   variance' = variance + alpha * ((x - w)^2 - variance)
//   n'        = n + 1
//
// The decreasing rate makes established keys stable while `alpha_min` keeps
// them responsive to regime shifts. New keys start from the fallback prior.
// Signals are folded in any order; `last_updated` only moves forward.

use crate::config::LearningConfig;
use crate::error::{Result, ValidationError};
use crate::models::{EngagementObservation, FeedbackEvent, ModelKey, PreferenceModel, UserId};
use crate::services::fallback::FallbackPolicy;
use crate::services::store::PreferenceStore;
use crate::utils::unit_clamp;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Normalized evidence for one model key
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSignal {
    pub key: ModelKey,
    /// Signal strength in [0, 1]
    pub strength: f64,
    /// Multiplier on the learning rate (1.0 for passive engagement)
    pub rate_multiplier: f64,
    pub observed_at: DateTime<Utc>,
}

pub struct ModelUpdater {
    config: LearningConfig,
    fallback: Arc<FallbackPolicy>,
}

impl ModelUpdater {
    pub fn new(config: LearningConfig, fallback: Arc<FallbackPolicy>) -> Self {
        Self { config, fallback }
    }

    /// Engagement rate scaled so that `engagement_rate_ceiling` maps to 1.0
    pub fn signal_from_observation(&self, observation: &EngagementObservation) -> FeedbackSignal {
        FeedbackSignal {
            key: observation.model_key(),
            strength: unit_clamp(observation.engagement_rate / self.config.engagement_rate_ceiling),
            rate_multiplier: 1.0,
            observed_at: observation.published_at,
        }
    }

    /// Explicit rating mapped linearly onto [0, 1], weighted by `feedback_weight`
    pub fn signal_from_rating(
        &self,
        event: &FeedbackEvent,
        key: ModelKey,
    ) -> std::result::Result<FeedbackSignal, ValidationError> {
        let max = self.config.rating_scale_max;
        if event.rating < 1 || event.rating > max {
            return Err(ValidationError::RatingOutOfRange {
                rating: event.rating,
                max,
            });
        }

        Ok(FeedbackSignal {
            key,
            strength: f64::from(event.rating - 1) / f64::from(max - 1),
            rate_multiplier: self.config.feedback_weight,
            observed_at: event.submitted_at,
        })
    }

    /// Pure fold of one signal into a model
    pub fn apply(&self, model: &mut PreferenceModel, signal: &FeedbackSignal) {
        let entry = model
            .entries
            .entry(signal.key.clone())
            .or_insert_with(|| self.fallback.seed_entry(&signal.key, signal.observed_at));

        let n = entry.sample_count;
        let alpha = (self.config.alpha_min.max(1.0 / (n as f64 + 1.0)) * signal.rate_multiplier)
            .min(1.0);
        let delta = signal.strength - entry.weight;

        entry.weight = unit_clamp(entry.weight + alpha * delta);
        entry.variance_estimate =
            (entry.variance_estimate + alpha * (delta * delta - entry.variance_estimate)).max(0.0);
        entry.sample_count = n + 1;
        if signal.observed_at > entry.last_updated {
            entry.last_updated = signal.observed_at;
        }
    }

    /// Fold a signal through the store's atomic update path
    pub async fn fold(
        &self,
        store: &PreferenceStore,
        user_id: UserId,
        signal: &FeedbackSignal,
    ) -> Result<PreferenceModel> {
        let model = store
            .atomic_update(user_id, |model| self.apply(model, signal))
            .await?;

        if let Some(entry) = model.entry(&signal.key) {
            debug!(
                user_id = %user_id,
                key = %signal.key,
                strength = signal.strength,
                weight = entry.weight,
                sample_count = entry.sample_count,
                "Signal folded into preference model"
            );
        }
        Ok(model)
    }
}

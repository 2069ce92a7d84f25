use crate::error::{EngineError, Result};
use crate::models::{ContentType, Platform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub service_name: String,
    pub log_level: String,
    /// How long in-memory idempotency entries are kept (seconds)
    pub dedup_ttl_secs: u64,
    pub learning: LearningConfig,
    pub exploration: ExplorationConfig,
    pub fallback: FallbackConfig,
    pub recommendation: RecommendationConfig,
    pub analytics: AnalyticsConfig,
    pub store: StoreConfig,
}

/// Online update constants of the feedback loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Floor of the learning rate; keeps established keys adaptive
    pub alpha_min: f64,
    /// Learning-rate multiplier for explicit ratings
    pub feedback_weight: f64,
    /// Engagement rate mapped to signal 1.0; higher rates saturate
    pub engagement_rate_ceiling: f64,
    /// Ratings are integers in 1..=rating_scale_max
    pub rating_scale_max: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationConfig {
    /// UCB exploration coefficient (beta)
    pub beta: f64,
}

/// Prior weights derived from the industry-default ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Prior of the first slot in a default ranking
    pub top_prior: f64,
    /// Prior decrease per rank position
    pub prior_step: f64,
    /// Prior of slots absent from the default ranking
    pub base_prior: f64,
    /// Variance seeded into brand-new keys
    pub prior_variance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    /// Below this many total observations the fallback ranking is used
    pub min_observations: u64,
    /// Confidence ceiling for fallback slots
    pub fallback_confidence_ceiling: f64,
    /// Sample count at which the evidence factor reaches 0.5
    pub confidence_half_count: f64,
    /// How strongly variance lowers confidence
    pub variance_penalty: f64,
    pub max_ranked_entries: usize,
    /// Ranked slots per day in the weekly calendar
    pub calendar_slots_per_day: usize,
    pub default_deadline_ms: u64,
    pub default_platforms: Vec<Platform>,
    /// Platform -> content types it accepts; platforms not listed accept all types
    #[serde(default)]
    pub platform_content_types: BTreeMap<Platform, Vec<ContentType>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Observations used for the trend slope
    pub trend_window: usize,
    pub top_n: usize,
    /// Slopes with a smaller magnitude count as stable
    pub stable_slope_epsilon: f64,
    pub refresh_interval_secs: u64,
    /// Users rebuilt concurrently by the refresh job
    pub refresh_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Redis is used for persistence when set, memory otherwise
    #[serde(default)]
    pub redis_url: Option<String>,
    pub key_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "scheduling-service".to_string(),
            log_level: "info".to_string(),
            dedup_ttl_secs: 7 * 86400,
            learning: LearningConfig::default(),
            exploration: ExplorationConfig::default(),
            fallback: FallbackConfig::default(),
            recommendation: RecommendationConfig::default(),
            analytics: AnalyticsConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            alpha_min: 0.05,
            feedback_weight: 2.0,
            engagement_rate_ceiling: 0.2,
            rating_scale_max: 5,
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self { beta: 0.05 }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            top_prior: 0.2,
            prior_step: 0.01,
            base_prior: 0.05,
            prior_variance: 0.05,
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            min_observations: 10,
            fallback_confidence_ceiling: 0.3,
            confidence_half_count: 10.0,
            variance_penalty: 10.0,
            max_ranked_entries: 10,
            calendar_slots_per_day: 3,
            default_deadline_ms: 2_000,
            default_platforms: ["linkedin", "twitter", "instagram", "facebook", "tiktok", "youtube"]
                .into_iter()
                .map(Platform::new)
                .collect(),
            platform_content_types: BTreeMap::new(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            trend_window: 50,
            top_n: 5,
            stable_slope_epsilon: 0.0005,
            refresh_interval_secs: 900,
            refresh_concurrency: 8,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            redis_url: None,
            key_prefix: "sched".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration: defaults, then `.env`, then `ENGINE_*` variables.
    ///
    /// Nested keys use a double underscore, e.g. `ENGINE_LEARNING__ALPHA_MIN=0.1`.
    /// `ENGINE_RECOMMENDATION__DEFAULT_PLATFORMS` takes a comma-separated list.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = config::Config::try_from(&Self::default())?;
        let config = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::Environment::with_prefix("ENGINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("recommendation.default_platforms"),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let learning = &self.learning;
        if !(learning.alpha_min > 0.0 && learning.alpha_min <= 1.0) {
            return Err(invalid("learning.alpha_min must be in (0, 1]"));
        }
        if learning.feedback_weight <= 0.0 {
            return Err(invalid("learning.feedback_weight must be positive"));
        }
        if learning.engagement_rate_ceiling <= 0.0 {
            return Err(invalid("learning.engagement_rate_ceiling must be positive"));
        }
        if learning.rating_scale_max < 2 {
            return Err(invalid("learning.rating_scale_max must be at least 2"));
        }

        if self.exploration.beta < 0.0 {
            return Err(invalid("exploration.beta must not be negative"));
        }

        let fallback = &self.fallback;
        if !(0.0..=1.0).contains(&fallback.top_prior)
            || !(0.0..=1.0).contains(&fallback.base_prior)
            || fallback.base_prior > fallback.top_prior
        {
            return Err(invalid(
                "fallback priors must be in [0, 1] with base_prior <= top_prior",
            ));
        }
        if fallback.prior_step < 0.0 || fallback.prior_variance < 0.0 {
            return Err(invalid("fallback.prior_step and prior_variance must not be negative"));
        }

        let rec = &self.recommendation;
        if !(rec.fallback_confidence_ceiling > 0.0 && rec.fallback_confidence_ceiling <= 1.0) {
            return Err(invalid(
                "recommendation.fallback_confidence_ceiling must be in (0, 1]",
            ));
        }
        if rec.confidence_half_count <= 0.0 || rec.variance_penalty < 0.0 {
            return Err(invalid(
                "recommendation.confidence_half_count must be positive and variance_penalty non-negative",
            ));
        }
        if rec.max_ranked_entries == 0 || rec.calendar_slots_per_day == 0 {
            return Err(invalid("ranked entry limits must be greater than 0"));
        }
        if rec.default_platforms.iter().all(Platform::is_empty) {
            return Err(invalid("recommendation.default_platforms must not be empty"));
        }
        if rec.default_deadline_ms == 0 {
            return Err(invalid("recommendation.default_deadline_ms must be greater than 0"));
        }

        if self.analytics.trend_window < 2 {
            return Err(invalid("analytics.trend_window must be at least 2"));
        }
        if self.analytics.refresh_interval_secs == 0 || self.analytics.refresh_concurrency == 0 {
            return Err(invalid(
                "analytics refresh interval and concurrency must be greater than 0",
            ));
        }

        if self.store.initial_backoff_ms > self.store.max_backoff_ms {
            return Err(invalid("store.initial_backoff_ms must not exceed max_backoff_ms"));
        }

        Ok(())
    }

    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.recommendation.default_deadline_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

fn invalid(message: &str) -> EngineError {
    EngineError::Configuration(message.to_string())
}

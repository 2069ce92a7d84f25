// ============================================
// Fallback Policy (冷啟動預設策略)
// ============================================
//
// Industry-default rankings of (platform, time bucket) per content type.
// Used as:
// 1. the seed prior for brand-new preference keys
// 2. the substitute ranking when a user lacks evidence
//
// `ranking` is total: content types without a dedicated table get the
// `general` table, so the policy can never fail to produce an answer.

use crate::config::FallbackConfig;
use crate::models::{ContentType, ModelKey, Platform, PreferenceEntry, TimeBucket};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

/// One entry of a default ranking
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FallbackSlot {
    pub platform: Platform,
    pub time_bucket: TimeBucket,
}

impl FallbackSlot {
    pub fn new(platform: impl Into<Platform>, time_bucket: TimeBucket) -> Self {
        Self {
            platform: platform.into(),
            time_bucket,
        }
    }
}

// (platform, day_of_week with 0 = Sunday, hour UTC)
type DefaultRow = (&'static str, u8, u8);

const EDUCATIONAL: &[DefaultRow] = &[
    ("linkedin", 2, 9),
    ("linkedin", 3, 10),
    ("linkedin", 4, 9),
    ("twitter", 2, 12),
    ("linkedin", 2, 12),
    ("youtube", 4, 15),
    ("twitter", 3, 9),
    ("facebook", 3, 11),
    ("instagram", 1, 11),
    ("linkedin", 5, 8),
];

const PROMOTIONAL: &[DefaultRow] = &[
    ("instagram", 3, 11),
    ("facebook", 4, 13),
    ("instagram", 5, 10),
    ("twitter", 3, 12),
    ("tiktok", 4, 19),
    ("linkedin", 2, 10),
    ("facebook", 2, 10),
    ("instagram", 1, 18),
    ("twitter", 5, 9),
    ("tiktok", 6, 11),
];

const ENTERTAINMENT: &[DefaultRow] = &[
    ("tiktok", 5, 19),
    ("instagram", 6, 11),
    ("tiktok", 6, 20),
    ("youtube", 6, 15),
    ("instagram", 0, 19),
    ("twitter", 5, 21),
    ("facebook", 0, 13),
    ("youtube", 5, 17),
    ("tiktok", 3, 21),
    ("instagram", 4, 20),
];

const NEWS: &[DefaultRow] = &[
    ("twitter", 1, 8),
    ("twitter", 2, 8),
    ("linkedin", 1, 7),
    ("facebook", 1, 9),
    ("twitter", 3, 12),
    ("linkedin", 3, 8),
    ("twitter", 4, 17),
    ("facebook", 4, 12),
    ("youtube", 2, 18),
    ("instagram", 3, 8),
];

const GENERAL: &[DefaultRow] = &[
    ("instagram", 3, 11),
    ("linkedin", 2, 10),
    ("twitter", 3, 12),
    ("facebook", 4, 13),
    ("tiktok", 5, 19),
    ("youtube", 6, 15),
    ("linkedin", 4, 9),
    ("instagram", 2, 19),
    ("twitter", 1, 9),
    ("facebook", 3, 12),
];

fn builtin_rows(content_type: &str) -> &'static [DefaultRow] {
    match content_type {
        "educational" => EDUCATIONAL,
        "promotional" => PROMOTIONAL,
        "entertainment" => ENTERTAINMENT,
        "news" => NEWS,
        _ => GENERAL,
    }
}

fn to_slots(rows: &[DefaultRow]) -> Vec<FallbackSlot> {
    rows.iter()
        .filter_map(|(platform, day, hour)| {
            TimeBucket::new(*day, *hour).map(|bucket| FallbackSlot::new(*platform, bucket))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    config: FallbackConfig,
    overrides: BTreeMap<ContentType, Vec<FallbackSlot>>,
}

impl FallbackPolicy {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            overrides: BTreeMap::new(),
        }
    }

    /// Built-in industry defaults with default prior constants
    pub fn industry_defaults() -> Self {
        Self::new(FallbackConfig::default())
    }

    /// Replace the default ranking of one content type. Empty rankings are ignored.
    pub fn with_ranking(mut self, content_type: ContentType, slots: Vec<FallbackSlot>) -> Self {
        if !slots.is_empty() {
            self.overrides.insert(content_type, slots);
        }
        self
    }

    /// Content types with a dedicated default table (plus `general`)
    pub fn supported_content_types(&self) -> Vec<ContentType> {
        let mut types: Vec<ContentType> = ["educational", "promotional", "entertainment", "news"]
            .into_iter()
            .map(ContentType::new)
            .chain(self.overrides.keys().cloned())
            .chain(std::iter::once(ContentType::general()))
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Default ranking for `content_type`, best first, without duplicates
    pub fn ranking(&self, content_type: &ContentType) -> Vec<FallbackSlot> {
        let slots = match self.overrides.get(content_type) {
            Some(slots) => slots.clone(),
            None => to_slots(builtin_rows(content_type.as_str())),
        };

        let mut seen = HashSet::new();
        slots
            .into_iter()
            .filter(|slot| seen.insert(slot.clone()))
            .collect()
    }

    /// Prior weight of a key: decreasing along the default ranking, `base_prior` elsewhere
    pub fn prior_weight(&self, key: &ModelKey) -> f64 {
        let position = self.ranking(&key.content_type).iter().position(|slot| {
            slot.platform == key.platform && slot.time_bucket == key.time_bucket
        });
        self.prior_at(position)
    }

    /// Prior of a slot given its position in a default ranking (`None` = unlisted)
    pub fn prior_at(&self, position: Option<usize>) -> f64 {
        match position {
            Some(rank) => (self.config.top_prior - self.config.prior_step * rank as f64)
                .max(self.config.base_prior),
            None => self.config.base_prior,
        }
    }

    pub fn prior_variance(&self) -> f64 {
        self.config.prior_variance
    }

    /// Entry a brand-new key starts from before its first update
    pub fn seed_entry(&self, key: &ModelKey, at: DateTime<Utc>) -> PreferenceEntry {
        PreferenceEntry {
            weight: self.prior_weight(key),
            sample_count: 0,
            variance_estimate: self.prior_variance(),
            last_updated: at,
        }
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::industry_defaults()
    }
}

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod observation;
pub mod preference;
pub mod recommendation;

pub use observation::{EngagementObservation, FeedbackEvent, RawEngagementEvent};
pub use preference::{PreferenceEntry, PreferenceModel};
pub use recommendation::{RankedSlot, RecommendationRequest, SchedulingRecommendation};

pub type UserId = Uuid;
pub type ContentId = Uuid;

/// Publishing platform, normalized to lower case (`linkedin`, `tiktok`, ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Platform(String);

impl Platform {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Platform {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Platform {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        value.0
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content category (`educational`, `promotional`, ...), normalized to lower case
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContentType(String);

impl ContentType {
    pub const GENERAL: &'static str = "general";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn general() -> Self {
        Self(Self::GENERAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for ContentType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ContentType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        value.0
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Weekly posting slot: day of week (0 = Sunday, 6 = Saturday) and hour of day (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeBucket {
    pub day_of_week: u8,
    pub hour_of_day: u8,
}

impl TimeBucket {
    pub const COUNT: usize = 7 * 24;

    /// Returns `None` when the day or hour is out of range.
    pub fn new(day_of_week: u8, hour_of_day: u8) -> Option<Self> {
        (day_of_week < 7 && hour_of_day < 24).then_some(Self {
            day_of_week,
            hour_of_day,
        })
    }

    pub fn from_datetime(at: &DateTime<Utc>) -> Self {
        Self {
            day_of_week: at.weekday().num_days_from_sunday() as u8,
            hour_of_day: at.hour() as u8,
        }
    }

    pub fn index(&self) -> usize {
        self.day_of_week as usize * 24 + self.hour_of_day as usize
    }

    pub fn day_name(&self) -> &'static str {
        DAY_NAMES[self.day_of_week as usize % 7]
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.day_name(), self.hour_of_day)
    }
}

/// Key of a learned preference: where, what and when
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub platform: Platform,
    pub content_type: ContentType,
    pub time_bucket: TimeBucket,
}

impl ModelKey {
    pub fn new(platform: Platform, content_type: ContentType, time_bucket: TimeBucket) -> Self {
        Self {
            platform,
            content_type,
            time_bucket,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.platform, self.content_type, self.time_bucket
        )
    }
}

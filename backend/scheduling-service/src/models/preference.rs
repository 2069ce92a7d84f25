use super::{ContentType, ModelKey, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Learned statistics for one `(platform, content_type, time_bucket)` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceEntry {
    /// Running score in [0, 1]
    pub weight: f64,
    pub sample_count: u64,
    pub variance_estimate: f64,
    /// Latest event time folded into this entry; never moves backwards
    pub last_updated: DateTime<Utc>,
}

/// Per-user preference model.
///
/// Owned by the preference store and only mutated through its atomic update
/// path. `version` increments on every successful write and backs the
/// optimistic concurrency check of the repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceModel {
    pub user_id: UserId,
    pub version: u64,
    #[serde(with = "entry_list")]
    pub entries: BTreeMap<ModelKey, PreferenceEntry>,
}

impl PreferenceModel {
    /// Model of a user with no evidence at all
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            version: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn entry(&self, key: &ModelKey) -> Option<&PreferenceEntry> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total observations folded across all keys
    pub fn total_samples(&self) -> u64 {
        self.entries.values().map(|e| e.sample_count).sum()
    }

    /// Content types the user has evidence for, in stable order
    pub fn content_types(&self) -> BTreeSet<ContentType> {
        self.entries
            .keys()
            .map(|key| key.content_type.clone())
            .collect()
    }
}

/// JSON object keys must be strings, so entries travel as a list of rows.
mod entry_list {
    use super::{ModelKey, PreferenceEntry};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct RowRef<'a> {
        key: &'a ModelKey,
        entry: &'a PreferenceEntry,
    }

    #[derive(Deserialize)]
    struct Row {
        key: ModelKey,
        entry: PreferenceEntry,
    }

    pub fn serialize<S>(
        entries: &BTreeMap<ModelKey, PreferenceEntry>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(entries.iter().map(|(key, entry)| RowRef { key, entry }))
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<ModelKey, PreferenceEntry>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let rows = Vec::<Row>::deserialize(deserializer)?;
        Ok(rows.into_iter().map(|row| (row.key, row.entry)).collect())
    }
}

use crate::error::StoreError;
use crate::models::{EngagementObservation, FeedbackEvent, PreferenceModel, UserId};
use async_trait::async_trait;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence of preference models (get/put semantics only).
///
/// Implementations must make `save` conditional: it succeeds only when the
/// stored version still equals `expected_version` (0 = absent), otherwise it
/// returns `StoreError::Conflict` without writing.
#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn load(&self, user_id: UserId) -> StoreResult<Option<PreferenceModel>>;

    async fn save(&self, model: &PreferenceModel, expected_version: u64) -> StoreResult<()>;

    async fn delete(&self, user_id: UserId) -> StoreResult<()>;
}

/// Observation and feedback history, keyed for idempotent appends
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Returns `false` when the observation id was already recorded for the user.
    async fn append_observation(&self, observation: &EngagementObservation) -> StoreResult<bool>;

    async fn remove_observation(&self, user_id: UserId, observation_id: &str) -> StoreResult<()>;

    /// Returns `false` when the event id was already recorded for the user.
    async fn append_feedback(&self, event: &FeedbackEvent) -> StoreResult<bool>;

    async fn remove_feedback(&self, user_id: UserId, event_id: &str) -> StoreResult<()>;

    /// All observations of a user, ordered by `(published_at, observation_id)`
    async fn observations(&self, user_id: UserId) -> StoreResult<Vec<EngagementObservation>>;

    /// Users with at least one recorded observation
    async fn users(&self) -> StoreResult<Vec<UserId>>;

    /// Drop every observation and feedback event of the user
    async fn purge_user(&self, user_id: UserId) -> StoreResult<()>;
}

pub(crate) fn sort_chronologically(observations: &mut [EngagementObservation]) {
    observations.sort_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then_with(|| a.observation_id.cmp(&b.observation_id))
    });
}

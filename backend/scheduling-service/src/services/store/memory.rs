use super::repository::{sort_chronologically, HistoryRepository, ModelRepository, StoreResult};
use crate::error::StoreError;
use crate::models::{EngagementObservation, FeedbackEvent, PreferenceModel, UserId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Process-local model repository
#[derive(Debug, Default)]
pub struct InMemoryModelRepository {
    models: DashMap<UserId, PreferenceModel>,
}

impl InMemoryModelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[async_trait]
impl ModelRepository for InMemoryModelRepository {
    async fn load(&self, user_id: UserId) -> StoreResult<Option<PreferenceModel>> {
        Ok(self.models.get(&user_id).map(|model| model.clone()))
    }

    async fn save(&self, model: &PreferenceModel, expected_version: u64) -> StoreResult<()> {
        // The entry guard holds the shard lock, making check-and-set atomic.
        match self.models.entry(model.user_id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().version != expected_version {
                    return Err(StoreError::Conflict);
                }
                occupied.insert(model.clone());
            }
            Entry::Vacant(vacant) => {
                if expected_version != 0 {
                    return Err(StoreError::Conflict);
                }
                vacant.insert(model.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, user_id: UserId) -> StoreResult<()> {
        self.models.remove(&user_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct UserHistory {
    observations: BTreeMap<String, EngagementObservation>,
    feedback: BTreeMap<String, FeedbackEvent>,
}

/// Process-local observation/feedback history
#[derive(Debug, Default)]
pub struct InMemoryHistoryRepository {
    users: DashMap<UserId, UserHistory>,
}

impl InMemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryRepository for InMemoryHistoryRepository {
    async fn append_observation(&self, observation: &EngagementObservation) -> StoreResult<bool> {
        let mut history = self.users.entry(observation.user_id).or_default();
        if history
            .observations
            .contains_key(&observation.observation_id)
        {
            return Ok(false);
        }
        history
            .observations
            .insert(observation.observation_id.clone(), observation.clone());
        Ok(true)
    }

    async fn remove_observation(&self, user_id: UserId, observation_id: &str) -> StoreResult<()> {
        if let Some(mut history) = self.users.get_mut(&user_id) {
            history.observations.remove(observation_id);
        }
        Ok(())
    }

    async fn append_feedback(&self, event: &FeedbackEvent) -> StoreResult<bool> {
        let mut history = self.users.entry(event.user_id).or_default();
        if history.feedback.contains_key(&event.event_id) {
            return Ok(false);
        }
        history
            .feedback
            .insert(event.event_id.clone(), event.clone());
        Ok(true)
    }

    async fn remove_feedback(&self, user_id: UserId, event_id: &str) -> StoreResult<()> {
        if let Some(mut history) = self.users.get_mut(&user_id) {
            history.feedback.remove(event_id);
        }
        Ok(())
    }

    async fn observations(&self, user_id: UserId) -> StoreResult<Vec<EngagementObservation>> {
        let mut observations: Vec<EngagementObservation> = self
            .users
            .get(&user_id)
            .map(|history| history.observations.values().cloned().collect())
            .unwrap_or_default();
        sort_chronologically(&mut observations);
        Ok(observations)
    }

    async fn users(&self) -> StoreResult<Vec<UserId>> {
        let mut users: Vec<UserId> = self
            .users
            .iter()
            .filter(|entry| !entry.observations.is_empty())
            .map(|entry| *entry.key())
            .collect();
        users.sort();
        Ok(users)
    }

    async fn purge_user(&self, user_id: UserId) -> StoreResult<()> {
        self.users.remove(&user_id);
        Ok(())
    }
}

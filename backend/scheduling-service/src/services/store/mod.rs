// ============================================
// Preference Model Store (偏好模型存儲)
// ============================================
//
// Sole owner of per-user preference models. Every write goes through
// `atomic_update`, which:
// 1. takes the user's async lock (different users never contend)
// 2. loads the current model (or the empty model)
// 3. applies the mutation to a copy and bumps the version
// 4. saves with an optimistic version check
//
// Version conflicts (another process wrote in between) are retried a bounded
// number of times and never reach the caller; transient backend failures go
// through exponential backoff first.

pub mod memory;
pub mod redis_store;
pub mod repository;

pub use memory::{InMemoryHistoryRepository, InMemoryModelRepository};
pub use redis_store::{RedisHistoryRepository, RedisModelRepository};
pub use repository::{HistoryRepository, ModelRepository, StoreResult};

use crate::error::{EngineError, Result, StoreError};
use crate::models::{PreferenceModel, UserId};
use crate::utils::{retry_transient, RetryConfig};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct PreferenceStore {
    repository: Arc<dyn ModelRepository>,
    locks: DashMap<UserId, Arc<Mutex<()>>>,
    retry: RetryConfig,
}

impl PreferenceStore {
    pub fn new(repository: Arc<dyn ModelRepository>, retry: RetryConfig) -> Self {
        Self {
            repository,
            locks: DashMap::new(),
            retry,
        }
    }

    /// Current model of the user; a never-seen user gets the empty model
    pub async fn get(&self, user_id: UserId) -> Result<PreferenceModel> {
        let repository = &self.repository;
        let model = retry_transient(&self.retry, "load_model", || repository.load(user_id)).await?;
        Ok(model.unwrap_or_else(|| PreferenceModel::empty(user_id)))
    }

    /// Read-modify-write of one user's model as a single indivisible step.
    ///
    /// Returns the model as written.
    pub async fn atomic_update<F>(&self, user_id: UserId, mut mutation: F) -> Result<PreferenceModel>
    where
        F: FnMut(&mut PreferenceModel) + Send,
    {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let repository = &self.repository;
        let mut conflicts = 0;

        loop {
            let current = self.get(user_id).await?;
            let mut next = current.clone();
            mutation(&mut next);
            next.user_id = user_id;
            next.version = current.version + 1;

            let expected = current.version;
            let saved =
                retry_transient(&self.retry, "save_model", || repository.save(&next, expected))
                    .await;

            match saved {
                Ok(()) => {
                    debug!(
                        user_id = %user_id,
                        version = next.version,
                        entries = next.entries.len(),
                        "Preference model updated"
                    );
                    return Ok(next);
                }
                Err(StoreError::Conflict) if conflicts < self.retry.max_retries => {
                    conflicts += 1;
                    warn!(
                        user_id = %user_id,
                        expected_version = expected,
                        attempt = conflicts,
                        "Concurrent model write detected, re-reading"
                    );
                }
                Err(StoreError::Conflict) => {
                    return Err(EngineError::Store(format!(
                        "model of user {} kept changing after {} attempts",
                        user_id,
                        conflicts + 1
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Remove the whole model of the user
    pub async fn delete(&self, user_id: UserId) -> Result<()> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let repository = &self.repository;
        retry_transient(&self.retry, "delete_model", || repository.delete(user_id)).await?;
        info!(user_id = %user_id, "Preference model deleted");
        Ok(())
    }

    fn lock_for(&self, user_id: UserId) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, ModelKey, Platform, PreferenceEntry, TimeBucket};
    use async_trait::async_trait;
    use chrono::Utc;
    use mockall::mock;
    use std::time::Duration;
    use uuid::Uuid;

    mock! {
        pub Repo {}

        #[async_trait]
        impl ModelRepository for Repo {
            async fn load(&self, user_id: UserId) -> StoreResult<Option<PreferenceModel>>;
            async fn save(&self, model: &PreferenceModel, expected_version: u64) -> StoreResult<()>;
            async fn delete(&self, user_id: UserId) -> StoreResult<()>;
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    fn key() -> ModelKey {
        ModelKey::new(
            Platform::new("linkedin"),
            ContentType::new("educational"),
            TimeBucket::new(2, 9).unwrap(),
        )
    }

    fn bump(model: &mut PreferenceModel) {
        let entry = model.entries.entry(key()).or_insert(PreferenceEntry {
            weight: 0.0,
            sample_count: 0,
            variance_estimate: 0.0,
            last_updated: Utc::now(),
        });
        entry.sample_count += 1;
    }

    #[tokio::test]
    async fn test_get_returns_empty_model_for_unknown_user() {
        let store = PreferenceStore::new(Arc::new(InMemoryModelRepository::new()), fast_retry(3));
        let user_id = Uuid::new_v4();

        let model = store.get(user_id).await.unwrap();
        assert_eq!(model, PreferenceModel::empty(user_id));
    }

    #[tokio::test]
    async fn test_atomic_update_bumps_version() {
        let store = PreferenceStore::new(Arc::new(InMemoryModelRepository::new()), fast_retry(3));
        let user_id = Uuid::new_v4();

        let first = store.atomic_update(user_id, bump).await.unwrap();
        let second = store.atomic_update(user_id, bump).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(store.get(user_id).await.unwrap().entries[&key()].sample_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(PreferenceStore::new(
            Arc::new(InMemoryModelRepository::new()),
            fast_retry(3),
        ));
        let user_id = Uuid::new_v4();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.atomic_update(user_id, bump).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let model = store.get(user_id).await.unwrap();
        assert_eq!(model.version, 50);
        assert_eq!(model.entries[&key()].sample_count, 50);
    }

    #[tokio::test]
    async fn test_conflict_is_retried_internally() {
        let mut repo = MockRepo::new();
        repo.expect_load().returning(|_| Ok(None));
        let mut calls = 0;
        repo.expect_save().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(StoreError::Conflict)
            } else {
                Ok(())
            }
        });

        let store = PreferenceStore::new(Arc::new(repo), fast_retry(3));
        let model = store.atomic_update(Uuid::new_v4(), bump).await.unwrap();
        assert_eq!(model.version, 1);
    }

    #[tokio::test]
    async fn test_conflict_exhaustion_surfaces_store_error() {
        let mut repo = MockRepo::new();
        repo.expect_load().returning(|_| Ok(None));
        repo.expect_save()
            .times(3)
            .returning(|_, _| Err(StoreError::Conflict));

        let store = PreferenceStore::new(Arc::new(repo), fast_retry(2));
        let result = store.atomic_update(Uuid::new_v4(), bump).await;
        assert!(matches!(result, Err(EngineError::Store(_))));
    }

    #[tokio::test]
    async fn test_unavailable_backend_surfaces_after_backoff() {
        let mut repo = MockRepo::new();
        repo.expect_load()
            .times(3)
            .returning(|_| Err(StoreError::Unavailable("connection refused".to_string())));

        let store = PreferenceStore::new(Arc::new(repo), fast_retry(2));
        let result = store.get(Uuid::new_v4()).await;
        assert!(matches!(result, Err(EngineError::Store(_))));
    }

    #[tokio::test]
    async fn test_delete_resets_to_empty() {
        let store = PreferenceStore::new(Arc::new(InMemoryModelRepository::new()), fast_retry(3));
        let user_id = Uuid::new_v4();

        store.atomic_update(user_id, bump).await.unwrap();
        store.delete(user_id).await.unwrap();
        assert_eq!(store.get(user_id).await.unwrap(), PreferenceModel::empty(user_id));
    }
}

// ============================================
// Redis Repositories (Redis 持久化)
// ============================================
//
// Key layout (prefix configurable, default "sched"):
// - {prefix}:model:{user_id}  hash { version, model(JSON) }
// - {prefix}:obs:{user_id}    hash observation_id -> observation JSON
// - {prefix}:fb:{user_id}     hash event_id -> feedback JSON
// - {prefix}:users            set of user ids with history
//
// Model writes go through a Lua script so the version check and the write
// happen atomically on the server.

use super::repository::{sort_chronologically, HistoryRepository, ModelRepository, StoreResult};
use crate::error::StoreError;
use crate::models::{EngagementObservation, FeedbackEvent, PreferenceModel, UserId};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

const SAVE_IF_VERSION: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if current == false then current = '0' end
if current ~= ARGV[1] then return 0 end
redis.call('HSET', KEYS[1], 'version', ARGV[2], 'model', ARGV[3])
return 1
"#;

pub struct RedisModelRepository {
    redis: ConnectionManager,
    key_prefix: String,
    save_script: redis::Script,
}

impl RedisModelRepository {
    pub fn new(redis: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
            save_script: redis::Script::new(SAVE_IF_VERSION),
        }
    }

    fn model_key(&self, user_id: UserId) -> String {
        format!("{}:model:{}", self.key_prefix, user_id)
    }
}

#[async_trait]
impl ModelRepository for RedisModelRepository {
    async fn load(&self, user_id: UserId) -> StoreResult<Option<PreferenceModel>> {
        let mut conn = self.redis.clone();
        let json: Option<String> = conn.hget(self.model_key(user_id), "model").await?;

        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, model: &PreferenceModel, expected_version: u64) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(model)?;

        let written: i32 = self
            .save_script
            .key(self.model_key(model.user_id))
            .arg(expected_version.to_string())
            .arg(model.version.to_string())
            .arg(json)
            .invoke_async(&mut conn)
            .await?;

        if written == 1 {
            debug!(user_id = %model.user_id, version = model.version, "Saved preference model");
            Ok(())
        } else {
            Err(StoreError::Conflict)
        }
    }

    async fn delete(&self, user_id: UserId) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(self.model_key(user_id)).await?;
        Ok(())
    }
}

pub struct RedisHistoryRepository {
    redis: ConnectionManager,
    key_prefix: String,
}

impl RedisHistoryRepository {
    pub fn new(redis: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
        }
    }

    fn observations_key(&self, user_id: UserId) -> String {
        format!("{}:obs:{}", self.key_prefix, user_id)
    }

    fn feedback_key(&self, user_id: UserId) -> String {
        format!("{}:fb:{}", self.key_prefix, user_id)
    }

    fn users_key(&self) -> String {
        format!("{}:users", self.key_prefix)
    }
}

#[async_trait]
impl HistoryRepository for RedisHistoryRepository {
    async fn append_observation(&self, observation: &EngagementObservation) -> StoreResult<bool> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(observation)?;

        let inserted: bool = conn
            .hset_nx(
                self.observations_key(observation.user_id),
                &observation.observation_id,
                json,
            )
            .await?;
        if inserted {
            let _: () = conn
                .sadd(self.users_key(), observation.user_id.to_string())
                .await?;
        }
        Ok(inserted)
    }

    async fn remove_observation(&self, user_id: UserId, observation_id: &str) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .hdel(self.observations_key(user_id), observation_id)
            .await?;
        Ok(())
    }

    async fn append_feedback(&self, event: &FeedbackEvent) -> StoreResult<bool> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(event)?;
        let inserted: bool = conn
            .hset_nx(self.feedback_key(event.user_id), &event.event_id, json)
            .await?;
        Ok(inserted)
    }

    async fn remove_feedback(&self, user_id: UserId, event_id: &str) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.hdel(self.feedback_key(user_id), event_id).await?;
        Ok(())
    }

    async fn observations(&self, user_id: UserId) -> StoreResult<Vec<EngagementObservation>> {
        let mut conn = self.redis.clone();
        let rows: Vec<String> = conn.hvals(self.observations_key(user_id)).await?;

        // Unreadable rows fail the read rather than being skipped
        let mut observations = rows
            .iter()
            .map(|row| serde_json::from_str::<EngagementObservation>(row))
            .collect::<Result<Vec<_>, _>>()?;
        sort_chronologically(&mut observations);
        Ok(observations)
    }

    async fn users(&self) -> StoreResult<Vec<UserId>> {
        let mut conn = self.redis.clone();
        let members: Vec<String> = conn.smembers(self.users_key()).await?;

        let mut users: Vec<UserId> = members
            .iter()
            .filter_map(|member| Uuid::parse_str(member).ok())
            .collect();
        users.sort();
        Ok(users)
    }

    async fn purge_user(&self, user_id: UserId) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .del(&[self.observations_key(user_id), self.feedback_key(user_id)])
            .await?;
        let _: () = conn.srem(self.users_key(), user_id.to_string()).await?;
        Ok(())
    }
}

// ============================================
// Feedback Loop Engine (推薦與反饋引擎)
// ============================================
//
// Facade exposed to the surrounding platform:
// - ingest / submit_feedback: validate, dedup, record, fold into the model
// - recommend / weekly_calendar: rank slots against a model snapshot
// - get_insights: aggregate statistics from observation history
// - delete_user_model: remove every trace of a user
//
// Reads (recommend, calendar, insights) run under a caller deadline and never
// return partial results.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result, ValidationError};
use crate::models::{
    ContentId, EngagementObservation, FeedbackEvent, PreferenceModel, RawEngagementEvent,
    RecommendationRequest, SchedulingRecommendation, UserId,
};
use crate::services::analytics::{AnalyticsAggregator, Insights, TrendWindow};
use crate::services::fallback::FallbackPolicy;
use crate::services::ingest::{ContentCatalog, EventKey, IdempotencyGuard, ObservationIngestor};
use crate::services::scheduler::RecommendationGenerator;
use crate::services::store::{
    HistoryRepository, InMemoryHistoryRepository, InMemoryModelRepository, ModelRepository,
    PreferenceStore,
};
use crate::services::updater::{FeedbackSignal, ModelUpdater};
use crate::utils::{retry_transient, with_deadline, Clock, RetryConfig};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Folded into the preference model
    Applied,
    /// Already seen; nothing changed
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingested {
    pub observation: EngagementObservation,
    pub status: IngestStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackAck {
    pub event_id: String,
    pub duplicate: bool,
}

pub struct FeedbackLoopEngine {
    config: EngineConfig,
    store: PreferenceStore,
    history: Arc<dyn HistoryRepository>,
    ingestor: ObservationIngestor,
    updater: ModelUpdater,
    aggregator: AnalyticsAggregator,
    generator: RecommendationGenerator,
    guard: IdempotencyGuard,
    // Writers (ingest, feedback) share a user's gate; deletion takes it exclusively
    gates: DashMap<UserId, Arc<RwLock<()>>>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl FeedbackLoopEngine {
    pub fn new(
        config: EngineConfig,
        models: Arc<dyn ModelRepository>,
        history: Arc<dyn HistoryRepository>,
        catalog: Arc<dyn ContentCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fallback = Arc::new(FallbackPolicy::new(config.fallback.clone()));
        let retry = RetryConfig::from(&config.store);

        Self {
            store: PreferenceStore::new(models, retry.clone()),
            history,
            ingestor: ObservationIngestor::new(catalog, retry.clone()),
            updater: ModelUpdater::new(config.learning.clone(), fallback.clone()),
            aggregator: AnalyticsAggregator::new(config.analytics.clone()),
            generator: RecommendationGenerator::new(
                config.recommendation.clone(),
                &config.exploration,
                fallback,
            ),
            guard: IdempotencyGuard::new(config.dedup_ttl()),
            gates: DashMap::new(),
            clock,
            retry,
            config,
        }
    }

    /// Engine backed by process-local repositories
    pub fn in_memory(
        config: EngineConfig,
        catalog: Arc<dyn ContentCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryModelRepository::new()),
            Arc::new(InMemoryHistoryRepository::new()),
            catalog,
            clock,
        )
    }

    /// Replace the industry-default fallback policy (e.g. with custom rankings)
    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        let fallback = Arc::new(policy);
        self.updater = ModelUpdater::new(self.config.learning.clone(), fallback.clone());
        self.generator = RecommendationGenerator::new(
            self.config.recommendation.clone(),
            &self.config.exploration,
            fallback,
        );
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ============================================
    // Ingestion & feedback
    // ============================================

    /// Validate, record and fold one engagement event.
    ///
    /// Re-submitting an already recorded observation id returns the canonical
    /// record with `IngestStatus::Duplicate` and changes nothing.
    pub async fn ingest(&self, raw: RawEngagementEvent) -> Result<Ingested> {
        let observation = self.ingestor.normalize(raw).await?;
        let user_id = observation.user_id;
        let key = EventKey::Observation(observation.observation_id.clone());
        let gate = self.gate_for(user_id);
        let _writing = gate.read().await;

        if !self.guard.claim(user_id, key.clone()) {
            return Ok(duplicate(observation));
        }

        let history = &self.history;
        let appended = match retry_transient(&self.retry, "append_observation", || {
            history.append_observation(&observation)
        })
        .await
        {
            Ok(appended) => appended,
            Err(err) => {
                self.guard.release(user_id, &key);
                return Err(err.into());
            }
        };
        if !appended {
            debug!(
                user_id = %user_id,
                observation_id = %observation.observation_id,
                "Observation already recorded"
            );
            return Ok(duplicate(observation));
        }

        let signal = self.updater.signal_from_observation(&observation);
        if let Err(err) = self.updater.fold(&self.store, user_id, &signal).await {
            if let Err(remove_err) = retry_transient(&self.retry, "remove_observation", || {
                history.remove_observation(user_id, &observation.observation_id)
            })
            .await
            {
                warn!(
                    user_id = %user_id,
                    observation_id = %observation.observation_id,
                    error = %remove_err,
                    "Failed to roll back observation after fold failure"
                );
            }
            self.guard.release(user_id, &key);
            return Err(err);
        }

        self.aggregator.record(&observation);
        info!(
            user_id = %user_id,
            observation_id = %observation.observation_id,
            key = %signal.key,
            engagement_rate = observation.engagement_rate,
            "Observation ingested"
        );

        Ok(Ingested {
            observation,
            status: IngestStatus::Applied,
        })
    }

    /// Fold an explicit rating into the model.
    ///
    /// The rating applies to the key of the latest recorded observation of the
    /// same content item.
    pub async fn submit_feedback(&self, event: FeedbackEvent) -> Result<FeedbackAck> {
        if event.event_id.trim().is_empty() {
            return Err(ValidationError::MissingField("event_id").into());
        }
        let user_id = event.user_id;
        let history = &self.history;
        let gate = self.gate_for(user_id);
        let _writing = gate.read().await;

        let observations =
            retry_transient(&self.retry, "load_history", || history.observations(user_id)).await?;
        let model_key = observations
            .iter()
            .rev()
            .find(|observation| observation.content_id == event.content_id)
            .map(EngagementObservation::model_key)
            .ok_or(ValidationError::UnknownContent(event.content_id))?;
        let signal = self.updater.signal_from_rating(&event, model_key)?;

        let key = EventKey::Feedback(event.event_id.clone());
        if !self.guard.claim(user_id, key.clone()) {
            return Ok(FeedbackAck {
                event_id: event.event_id,
                duplicate: true,
            });
        }

        let appended = match retry_transient(&self.retry, "append_feedback", || {
            history.append_feedback(&event)
        })
        .await
        {
            Ok(appended) => appended,
            Err(err) => {
                self.guard.release(user_id, &key);
                return Err(err.into());
            }
        };
        if !appended {
            return Ok(FeedbackAck {
                event_id: event.event_id,
                duplicate: true,
            });
        }

        if let Err(err) = self.fold_feedback(user_id, &signal).await {
            if let Err(remove_err) = retry_transient(&self.retry, "remove_feedback", || {
                history.remove_feedback(user_id, &event.event_id)
            })
            .await
            {
                warn!(
                    user_id = %user_id,
                    event_id = %event.event_id,
                    error = %remove_err,
                    "Failed to roll back feedback after fold failure"
                );
            }
            self.guard.release(user_id, &key);
            return Err(err);
        }

        info!(
            user_id = %user_id,
            event_id = %event.event_id,
            rating = event.rating,
            key = %signal.key,
            "Feedback applied"
        );
        Ok(FeedbackAck {
            event_id: event.event_id,
            duplicate: false,
        })
    }

    async fn fold_feedback(&self, user_id: UserId, signal: &FeedbackSignal) -> Result<()> {
        self.updater.fold(&self.store, user_id, signal).await?;
        Ok(())
    }

    // ============================================
    // Recommendations
    // ============================================

    pub async fn recommend(&self, request: RecommendationRequest) -> Result<SchedulingRecommendation> {
        let deadline = request
            .deadline
            .unwrap_or_else(|| self.config.default_deadline());

        with_deadline(deadline, async {
            let model = self.store.get(request.user_id).await?;
            let now = self.clock.now();
            Ok::<_, EngineError>(self.generator.recommend(&model, &request, now)?)
        })
        .await
    }

    pub async fn weekly_calendar(&self, user_id: UserId) -> Result<Vec<SchedulingRecommendation>> {
        self.weekly_calendar_within(user_id, self.config.default_deadline())
            .await
    }

    pub async fn weekly_calendar_within(
        &self,
        user_id: UserId,
        deadline: Duration,
    ) -> Result<Vec<SchedulingRecommendation>> {
        with_deadline(deadline, async {
            let model = self.store.get(user_id).await?;
            Ok::<_, EngineError>(self.generator.weekly_calendar(&model, self.clock.now())?)
        })
        .await
    }

    // ============================================
    // Insights
    // ============================================

    /// Aggregate statistics of the user, optionally restricted to one content item.
    ///
    /// User-wide insights are served from the cached accumulator when present.
    pub async fn get_insights(
        &self,
        user_id: UserId,
        content_id: Option<ContentId>,
    ) -> Result<Insights> {
        if content_id.is_none() {
            if let Some(cached) = self.aggregator.cached(user_id) {
                return Ok(cached);
            }
        }

        with_deadline(self.config.default_deadline(), async {
            let history = self.load_history(user_id).await?;
            Ok::<_, EngineError>(match content_id {
                None => self.aggregator.rebuild(user_id, &history),
                Some(content_id) => self.scoped_insights(user_id, content_id, &history, None),
            })
        })
        .await
    }

    /// Fresh computation with an explicit trend window, bypassing the cache
    pub async fn get_insights_with_window(
        &self,
        user_id: UserId,
        content_id: Option<ContentId>,
        window: TrendWindow,
        deadline: Duration,
    ) -> Result<Insights> {
        with_deadline(deadline, async {
            let history = self.load_history(user_id).await?;
            Ok::<_, EngineError>(match content_id {
                None => self.aggregator.compute(user_id, None, &history, window),
                Some(content_id) => {
                    self.scoped_insights(user_id, content_id, &history, Some(window))
                }
            })
        })
        .await
    }

    fn scoped_insights(
        &self,
        user_id: UserId,
        content_id: ContentId,
        history: &[EngagementObservation],
        window: Option<TrendWindow>,
    ) -> Insights {
        let scoped: Vec<EngagementObservation> = history
            .iter()
            .filter(|observation| observation.content_id == content_id)
            .cloned()
            .collect();
        let window = window.unwrap_or_else(|| self.aggregator.default_window());
        self.aggregator
            .compute(user_id, Some(content_id), &scoped, window)
    }

    /// Rebuild the cached snapshot of one user from history
    pub async fn refresh_user_aggregates(&self, user_id: UserId) -> Result<()> {
        let history = self.load_history(user_id).await?;
        self.aggregator.rebuild(user_id, &history);
        Ok(())
    }

    /// Users with recorded history
    pub async fn known_users(&self) -> Result<Vec<UserId>> {
        let history = &self.history;
        Ok(retry_transient(&self.retry, "list_users", || history.users()).await?)
    }

    /// Drop idempotency claims older than the configured TTL
    pub fn purge_expired_claims(&self) -> usize {
        self.guard.purge_expired()
    }

    async fn load_history(&self, user_id: UserId) -> Result<Vec<EngagementObservation>> {
        let history = &self.history;
        Ok(retry_transient(&self.retry, "load_history", || history.observations(user_id)).await?)
    }

    fn gate_for(&self, user_id: UserId) -> Arc<RwLock<()>> {
        self.gates
            .entry(user_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }

    // ============================================
    // Model access & deletion
    // ============================================

    pub async fn model(&self, user_id: UserId) -> Result<PreferenceModel> {
        self.store.get(user_id).await
    }

    /// Remove the model, history, cached aggregates and idempotency claims of a user
    ///
    /// Waits for in-flight ingestion of the user to finish and holds further
    /// writes back until everything is gone.
    pub async fn delete_user_model(&self, user_id: UserId) -> Result<()> {
        let gate = self.gate_for(user_id);
        let _deleting = gate.write().await;

        self.store.delete(user_id).await?;

        let history = &self.history;
        retry_transient(&self.retry, "purge_history", || history.purge_user(user_id))
            .await
            .map_err(EngineError::from)?;

        self.aggregator.forget(user_id);
        self.guard.forget_user(user_id);
        info!(user_id = %user_id, "User data deleted");
        Ok(())
    }
}

fn duplicate(observation: EngagementObservation) -> Ingested {
    Ingested {
        observation,
        status: IngestStatus::Duplicate,
    }
}

// Integration tests for the feedback loop engine
//
// Exercised through the public engine API with in-memory repositories and a
// fixed clock.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use scheduling_service::services::store::{
    InMemoryHistoryRepository, InMemoryModelRepository, ModelRepository, StoreResult,
};
use scheduling_service::utils::FixedClock;
use scheduling_service::{
    ContentType, EngineConfig, EngineError, FallbackPolicy, FeedbackEvent, FeedbackLoopEngine,
    IngestStatus, Insights, ModelKey, Platform, PreferenceModel, RawEngagementEvent,
    RecommendationRequest, StaticContentCatalog, TimeBucket, TrendWindow, UserId,
    ValidationError,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

// Monday 2024-03-11 00:00 UTC
fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
}

// Tuesday 09:00 UTC, `weeks_ago` weeks before the test clock
fn tuesday_nine(weeks_ago: i64, minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap() - Duration::weeks(weeks_ago)
        + Duration::minutes(minute)
}

fn engine() -> FeedbackLoopEngine {
    FeedbackLoopEngine::in_memory(
        EngineConfig::default(),
        Arc::new(StaticContentCatalog::new()),
        Arc::new(FixedClock::new(monday())),
    )
}

#[allow(clippy::too_many_arguments)]
fn raw_event(
    user_id: UserId,
    observation_id: &str,
    content_id: Uuid,
    platform: &str,
    content_type: &str,
    published_at: DateTime<Utc>,
    views: i64,
    interactions: i64,
) -> RawEngagementEvent {
    RawEngagementEvent {
        observation_id: Some(observation_id.to_string()),
        user_id: Some(user_id),
        content_id: Some(content_id),
        platform: Some(platform.to_string()),
        content_type: Some(content_type.to_string()),
        published_at: Some(published_at),
        views: Some(views),
        likes: Some(interactions),
        comments: Some(0),
        shares: Some(0),
        tags: vec!["tutorial".to_string()],
    }
}

fn linkedin_key() -> ModelKey {
    ModelKey::new(
        Platform::new("linkedin"),
        ContentType::new("educational"),
        TimeBucket::new(2, 9).unwrap(),
    )
}

/// 40 strong observations on (linkedin, educational, Tue 09:00) and 10 weak
/// ones on other slots
async fn ingest_scenario(engine: &FeedbackLoopEngine, user_id: UserId) {
    for i in 0..40 {
        let event = raw_event(
            user_id,
            &format!("strong-{i}"),
            Uuid::new_v4(),
            "linkedin",
            "educational",
            tuesday_nine(i % 8, i / 8),
            1000,
            80,
        );
        engine.ingest(event).await.unwrap();
    }
    for i in 0..10 {
        // Wednesdays, 10:00 to 19:00
        let published_at = Utc.with_ymd_and_hms(2024, 3, 6, 10 + i as u32, 0, 0).unwrap();
        let event = raw_event(
            user_id,
            &format!("weak-{i}"),
            Uuid::new_v4(),
            "twitter",
            "educational",
            published_at,
            1000,
            20,
        );
        engine.ingest(event).await.unwrap();
    }
}

struct SlowModels {
    inner: InMemoryModelRepository,
    delay: std::time::Duration,
}

#[async_trait]
impl ModelRepository for SlowModels {
    async fn load(&self, user_id: UserId) -> StoreResult<Option<PreferenceModel>> {
        tokio::time::sleep(self.delay).await;
        self.inner.load(user_id).await
    }

    async fn save(&self, model: &PreferenceModel, expected_version: u64) -> StoreResult<()> {
        self.inner.save(model, expected_version).await
    }

    async fn delete(&self, user_id: UserId) -> StoreResult<()> {
        self.inner.delete(user_id).await
    }
}

#[tokio::test]
async fn test_concrete_scenario_ranks_linkedin_tuesday_first() {
    let engine = engine();
    let user_id = Uuid::new_v4();
    ingest_scenario(&engine, user_id).await;

    let request = RecommendationRequest::new(user_id, ContentType::new("educational"), 168);
    let recommendation = engine.recommend(request).await.unwrap();

    assert!(!recommendation.fallback_used);
    let top = recommendation.top().unwrap();
    assert_eq!(top.platform.as_str(), "linkedin");
    assert_eq!(top.time_bucket, TimeBucket::new(2, 9).unwrap());
    assert_eq!(top.sample_count, 40);
    assert_eq!(top.time_slot, Utc.with_ymd_and_hms(2024, 3, 12, 9, 0, 0).unwrap());
    assert!(top.confidence > 0.5);
}

#[tokio::test]
async fn test_idempotent_ingestion() {
    let once = engine();
    let twice = engine();
    let user_id = Uuid::new_v4();
    let event = raw_event(
        user_id,
        "obs-1",
        Uuid::new_v4(),
        "linkedin",
        "educational",
        tuesday_nine(0, 0),
        500,
        30,
    );

    once.ingest(event.clone()).await.unwrap();
    let first = twice.ingest(event.clone()).await.unwrap();
    let second = twice.ingest(event).await.unwrap();

    assert_eq!(first.status, IngestStatus::Applied);
    assert_eq!(second.status, IngestStatus::Duplicate);
    assert_eq!(first.observation, second.observation);
    assert_eq!(
        once.model(user_id).await.unwrap(),
        twice.model(user_id).await.unwrap()
    );
}

#[tokio::test]
async fn test_duplicate_detected_without_in_memory_claim() {
    // A second engine sharing the same history (e.g. after a restart) must
    // still treat the observation as seen.
    let history = Arc::new(InMemoryHistoryRepository::new());
    let models = Arc::new(InMemoryModelRepository::new());
    let build = || {
        FeedbackLoopEngine::new(
            EngineConfig::default(),
            models.clone(),
            history.clone(),
            Arc::new(StaticContentCatalog::new()),
            Arc::new(FixedClock::new(monday())),
        )
    };
    let user_id = Uuid::new_v4();
    let event = raw_event(
        user_id,
        "obs-1",
        Uuid::new_v4(),
        "twitter",
        "news",
        tuesday_nine(0, 0),
        100,
        5,
    );

    assert_eq!(build().ingest(event.clone()).await.unwrap().status, IngestStatus::Applied);
    let restarted = build();
    assert_eq!(restarted.ingest(event).await.unwrap().status, IngestStatus::Duplicate);
    assert_eq!(restarted.model(user_id).await.unwrap().version, 1);
}

#[tokio::test]
async fn test_convergence_toward_constant_signal() {
    let engine = engine();
    let user_id = Uuid::new_v4();

    // Start away from the target: rate 0.02 -> signal 0.1
    engine
        .ingest(raw_event(
            user_id,
            "seed",
            Uuid::new_v4(),
            "linkedin",
            "educational",
            tuesday_nine(60, 0),
            1000,
            20,
        ))
        .await
        .unwrap();
    let seeded = engine.model(user_id).await.unwrap();
    let mut last_distance = (seeded.entry(&linkedin_key()).unwrap().weight - 0.5).abs();
    assert!(last_distance > 0.3);

    let mut first_variance = None;
    for i in 0..60 {
        let event = raw_event(
            user_id,
            &format!("obs-{i}"),
            Uuid::new_v4(),
            "linkedin",
            "educational",
            tuesday_nine(i, 0),
            1000,
            100, // rate 0.1 -> signal 0.5
        );
        engine.ingest(event).await.unwrap();

        let model = engine.model(user_id).await.unwrap();
        let entry = model.entry(&linkedin_key()).unwrap();
        let distance = (entry.weight - 0.5).abs();
        assert!(distance < last_distance, "step {i}: {distance} >= {last_distance}");
        last_distance = distance;
        first_variance.get_or_insert(entry.variance_estimate);
    }

    let model = engine.model(user_id).await.unwrap();
    let entry = model.entry(&linkedin_key()).unwrap();
    assert_eq!(entry.sample_count, 61);
    assert!(last_distance < 0.01);
    assert!(entry.variance_estimate < first_variance.unwrap() * 0.1);
}

#[tokio::test]
async fn test_cold_start_uses_default_ranking() {
    let engine = engine();
    let user_id = Uuid::new_v4();
    let content_type = ContentType::new("promotional");

    let recommendation = engine
        .recommend(RecommendationRequest::new(user_id, content_type.clone(), 168))
        .await
        .unwrap();

    assert!(recommendation.fallback_used);
    assert_eq!(recommendation.model_version, 0);
    let expected: Vec<(Platform, TimeBucket)> = FallbackPolicy::default()
        .ranking(&content_type)
        .into_iter()
        .map(|slot| (slot.platform, slot.time_bucket))
        .collect();
    let actual: Vec<(Platform, TimeBucket)> = recommendation
        .slots
        .iter()
        .map(|slot| (slot.platform.clone(), slot.time_bucket))
        .collect();
    assert_eq!(actual, expected);
    assert!(recommendation
        .slots
        .iter()
        .all(|slot| slot.confidence <= EngineConfig::default().recommendation.fallback_confidence_ceiling));
    assert!(recommendation.reasoning_text.contains("Industry defaults"));
}

#[tokio::test]
async fn test_weekly_calendar_size_and_uniqueness() {
    let engine = engine();
    let user_id = Uuid::new_v4();

    let cold = engine.weekly_calendar(user_id).await.unwrap();
    assert!(cold.iter().all(|day| day.fallback_used));
    ingest_scenario(&engine, user_id).await;
    let learned = engine.weekly_calendar(user_id).await.unwrap();
    assert!(learned.iter().all(|day| !day.fallback_used));

    for calendar in [cold, learned] {
        assert!(calendar.len() >= 7);

        let mut seen = HashSet::new();
        for day in &calendar {
            assert!(!day.slots.is_empty());
            for slot in &day.slots {
                assert!(
                    seen.insert((slot.platform.clone(), slot.time_slot)),
                    "duplicate calendar entry {} at {}",
                    slot.platform,
                    slot.time_slot
                );
            }
        }
    }
}

#[tokio::test]
async fn test_recommendation_is_deterministic() {
    let engine = engine();
    let user_id = Uuid::new_v4();
    ingest_scenario(&engine, user_id).await;

    let request = RecommendationRequest::new(user_id, ContentType::new("educational"), 72)
        .with_platforms(["linkedin", "twitter", "instagram"]);

    let first = engine.recommend(request.clone()).await.unwrap();
    let second = engine.recommend(request).await.unwrap();
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

#[tokio::test]
async fn test_incremental_insights_match_full_recomputation() {
    let engine = engine();
    let user_id = Uuid::new_v4();

    // Prime the cache, then stream observations in non-chronological order
    let empty = engine.get_insights(user_id, None).await.unwrap();
    assert!(matches!(empty, Insights::InsufficientData { .. }));

    let content_id = Uuid::new_v4();
    for i in [5_i64, 1, 9, 0, 7, 3, 8, 2, 6, 4] {
        let event = raw_event(
            user_id,
            &format!("obs-{i}"),
            content_id,
            if i % 2 == 0 { "linkedin" } else { "instagram" },
            "educational",
            tuesday_nine(0, -i * 60),
            1000,
            10 * (i + 1),
        );
        engine.ingest(event).await.unwrap();
    }

    let incremental = engine.get_insights(user_id, None).await.unwrap();
    let full = engine
        .get_insights_with_window(
            user_id,
            None,
            TrendWindow::LastObservations(EngineConfig::default().analytics.trend_window),
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert!(incremental.is_ready());
    assert_eq!(
        serde_json::to_string(&incremental).unwrap(),
        serde_json::to_string(&full).unwrap()
    );
}

#[tokio::test]
async fn test_content_scoped_insights() {
    let engine = engine();
    let user_id = Uuid::new_v4();
    let content_a = Uuid::new_v4();
    let content_b = Uuid::new_v4();

    for (i, content_id) in [content_a, content_a, content_b].into_iter().enumerate() {
        let event = raw_event(
            user_id,
            &format!("obs-{i}"),
            content_id,
            "linkedin",
            "educational",
            tuesday_nine(i as i64, 0),
            100,
            5,
        );
        engine.ingest(event).await.unwrap();
    }

    let scoped = engine.get_insights(user_id, Some(content_a)).await.unwrap();
    let snapshot = scoped.snapshot().unwrap();
    assert_eq!(snapshot.content_id, Some(content_a));
    assert_eq!(snapshot.observation_count, 2);

    let unknown = engine.get_insights(user_id, Some(Uuid::new_v4())).await.unwrap();
    assert!(!unknown.is_ready());
}

#[tokio::test]
async fn test_deletion_resets_user() {
    let engine = engine();
    let user_id = Uuid::new_v4();
    let content_id = Uuid::new_v4();
    let event = raw_event(
        user_id,
        "obs-1",
        content_id,
        "linkedin",
        "educational",
        tuesday_nine(0, 0),
        1000,
        80,
    );

    engine.ingest(event.clone()).await.unwrap();
    engine
        .submit_feedback(FeedbackEvent {
            event_id: "fb-1".to_string(),
            user_id,
            content_id,
            rating: 5,
            submitted_at: monday(),
        })
        .await
        .unwrap();
    assert!(engine.get_insights(user_id, None).await.unwrap().is_ready());

    engine.delete_user_model(user_id).await.unwrap();

    assert_eq!(
        engine.model(user_id).await.unwrap(),
        PreferenceModel::empty(user_id)
    );
    assert!(!engine.get_insights(user_id, None).await.unwrap().is_ready());
    assert!(!engine.known_users().await.unwrap().contains(&user_id));

    // Behaves like a never-seen user: the same observation is new again
    let again = engine.ingest(event).await.unwrap();
    assert_eq!(again.status, IngestStatus::Applied);
}

#[tokio::test]
async fn test_feedback_moves_model_and_is_idempotent() {
    let engine = engine();
    let user_id = Uuid::new_v4();
    let content_id = Uuid::new_v4();
    engine
        .ingest(raw_event(
            user_id,
            "obs-1",
            content_id,
            "linkedin",
            "educational",
            tuesday_nine(0, 0),
            1000,
            20,
        ))
        .await
        .unwrap();
    let before = engine.model(user_id).await.unwrap();

    let feedback = FeedbackEvent {
        event_id: "fb-1".to_string(),
        user_id,
        content_id,
        rating: 5,
        submitted_at: monday(),
    };
    let ack = engine.submit_feedback(feedback.clone()).await.unwrap();
    assert!(!ack.duplicate);

    let after = engine.model(user_id).await.unwrap();
    let (old, new) = (
        before.entry(&linkedin_key()).unwrap(),
        after.entry(&linkedin_key()).unwrap(),
    );
    assert!(new.weight > old.weight);
    assert_eq!(new.sample_count, 2);
    assert_eq!(new.last_updated, monday());

    let ack = engine.submit_feedback(feedback).await.unwrap();
    assert!(ack.duplicate);
    assert_eq!(engine.model(user_id).await.unwrap(), after);
}

#[tokio::test]
async fn test_invalid_feedback_rating_is_rejected() {
    let engine = engine();
    let user_id = Uuid::new_v4();
    let content_id = Uuid::new_v4();
    engine
        .ingest(raw_event(
            user_id,
            "obs-1",
            content_id,
            "twitter",
            "news",
            tuesday_nine(0, 0),
            100,
            3,
        ))
        .await
        .unwrap();
    let before = engine.model(user_id).await.unwrap();

    let result = engine
        .submit_feedback(FeedbackEvent {
            event_id: "fb-1".to_string(),
            user_id,
            content_id,
            rating: 0,
            submitted_at: monday(),
        })
        .await;

    assert!(matches!(
        result,
        Err(EngineError::Validation(ValidationError::RatingOutOfRange { rating: 0, max: 5 }))
    ));
    assert_eq!(engine.model(user_id).await.unwrap(), before);
}

#[tokio::test]
async fn test_validation_errors_leave_no_state() {
    let engine = engine();
    let user_id = Uuid::new_v4();

    let mut missing_user = raw_event(
        user_id,
        "obs-1",
        Uuid::new_v4(),
        "linkedin",
        "educational",
        tuesday_nine(0, 0),
        100,
        5,
    );
    missing_user.user_id = None;
    let err = engine.ingest(missing_user).await.unwrap_err();
    assert!(err.is_validation());

    let mut negative = raw_event(
        user_id,
        "obs-2",
        Uuid::new_v4(),
        "linkedin",
        "educational",
        tuesday_nine(0, 0),
        100,
        5,
    );
    negative.shares = Some(-1);
    let err = engine.ingest(negative).await.unwrap_err();
    assert!(err.is_validation());

    assert!(engine.known_users().await.unwrap().is_empty());
    assert_eq!(
        engine.model(user_id).await.unwrap(),
        PreferenceModel::empty(user_id)
    );
}

#[tokio::test]
async fn test_out_of_order_observations_keep_latest_timestamp() {
    let engine = engine();
    let user_id = Uuid::new_v4();

    for (id, weeks_ago) in [("newer", 0), ("older", 3)] {
        engine
            .ingest(raw_event(
                user_id,
                id,
                Uuid::new_v4(),
                "linkedin",
                "educational",
                tuesday_nine(weeks_ago, 0),
                100,
                5,
            ))
            .await
            .unwrap();
    }

    let model = engine.model(user_id).await.unwrap();
    let entry = model.entry(&linkedin_key()).unwrap();
    assert_eq!(entry.sample_count, 2);
    assert_eq!(entry.last_updated, tuesday_nine(0, 0));
}

#[tokio::test]
async fn test_concurrent_ingestion_loses_no_updates() {
    let engine = Arc::new(engine());
    let user_id = Uuid::new_v4();

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                // Every observation is delivered twice
                let event = raw_event(
                    user_id,
                    &format!("obs-{}", i % 50),
                    Uuid::new_v4(),
                    "linkedin",
                    "educational",
                    tuesday_nine(0, (i % 50) as i64),
                    100,
                    5,
                );
                engine.ingest(event).await
            })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().status == IngestStatus::Applied {
            applied += 1;
        }
    }

    let model = engine.model(user_id).await.unwrap();
    assert_eq!(applied, 50);
    assert_eq!(model.version, 50);
    assert_eq!(model.entry(&linkedin_key()).unwrap().sample_count, 50);
}

#[tokio::test]
async fn test_deadline_exceeded_returns_timeout() {
    let engine = FeedbackLoopEngine::new(
        EngineConfig::default(),
        Arc::new(SlowModels {
            inner: InMemoryModelRepository::new(),
            delay: std::time::Duration::from_millis(500),
        }),
        Arc::new(InMemoryHistoryRepository::new()),
        Arc::new(StaticContentCatalog::new()),
        Arc::new(FixedClock::new(monday())),
    );
    let user_id = Uuid::new_v4();

    let request = RecommendationRequest::new(user_id, ContentType::new("news"), 24)
        .with_deadline(std::time::Duration::from_millis(20));
    let err = engine.recommend(request).await.unwrap_err();
    assert!(err.is_timeout());

    let err = engine
        .weekly_calendar_within(user_id, std::time::Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
}

#[tokio::test]
async fn test_invalid_horizon_is_rejected() {
    let engine = engine();
    let request = RecommendationRequest::new(Uuid::new_v4(), ContentType::new("news"), 0);

    assert!(matches!(
        engine.recommend(request).await,
        Err(EngineError::Validation(ValidationError::InvalidHorizon(0)))
    ));
}

// ============================================
// Observation Ingestor (互動數據接入)
// ============================================
//
// Validates raw engagement events and normalizes them into canonical
// `EngagementObservation` records:
// - required: user_id, content_id, platform, published_at, >= 1 metric
// - metrics must not be negative; missing metrics count as 0
// - content_type comes from the event, else from the content catalog
// - engagement_rate = (likes + comments + shares) / max(views, 1)
//
// Normalization is a pure step. Duplicate detection lives in `dedup` and in
// the history repository; the engine wires them together.

pub mod catalog;
pub mod dedup;

pub use catalog::{ContentCatalog, StaticContentCatalog};
pub use dedup::{EventKey, IdempotencyGuard};

use crate::error::{Result, ValidationError};
use crate::models::{ContentType, EngagementObservation, Platform, RawEngagementEvent, TimeBucket};
use crate::utils::{retry_transient, RetryConfig};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Namespace of observation ids derived from event contents
const OBSERVATION_NAMESPACE: Uuid = Uuid::from_u128(0x3c8f_2a61_94d0_4e7b_a5f3_0b6e_d21c_7a48);

pub struct ObservationIngestor {
    catalog: Arc<dyn ContentCatalog>,
    retry: RetryConfig,
}

impl ObservationIngestor {
    pub fn new(catalog: Arc<dyn ContentCatalog>, retry: RetryConfig) -> Self {
        Self { catalog, retry }
    }

    /// Validate and normalize one raw event.
    ///
    /// Fails with `ValidationError` before anything is recorded.
    pub async fn normalize(&self, raw: RawEngagementEvent) -> Result<EngagementObservation> {
        let user_id = raw.user_id.ok_or(ValidationError::MissingField("user_id"))?;
        let content_id = raw
            .content_id
            .ok_or(ValidationError::MissingField("content_id"))?;

        let platform = raw
            .platform
            .as_deref()
            .map(Platform::new)
            .filter(|platform| !platform.is_empty())
            .ok_or(ValidationError::MissingField("platform"))?;

        let published_at = raw
            .published_at
            .ok_or(ValidationError::MissingField("published_at"))?;

        let metrics = [
            ("views", raw.views),
            ("likes", raw.likes),
            ("comments", raw.comments),
            ("shares", raw.shares),
        ];
        if metrics.iter().all(|(_, value)| value.is_none()) {
            return Err(ValidationError::NoMetrics.into());
        }
        if let Some((field, Some(value))) = metrics
            .iter()
            .find(|(_, value)| matches!(value, Some(v) if *v < 0))
        {
            warn!(user_id = %user_id, field = *field, value = *value, "Rejected negative metric");
            return Err(ValidationError::NegativeMetric {
                field: *field,
                value: *value,
            }
            .into());
        }
        let [views, likes, comments, shares] = metrics.map(|(_, value)| value.unwrap_or(0) as u64);

        let content_type = match raw
            .content_type
            .as_deref()
            .map(ContentType::new)
            .filter(|content_type| !content_type.is_empty())
        {
            Some(content_type) => content_type,
            None => {
                let catalog = &self.catalog;
                retry_transient(&self.retry, "content_type_lookup", || {
                    catalog.content_type(content_id)
                })
                .await?
                .ok_or(ValidationError::UnknownContentType(content_id))?
            }
        };

        let observation_id = raw
            .observation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let name = format!(
                    "{}:{}:{}:{}",
                    user_id,
                    content_id,
                    platform,
                    published_at.to_rfc3339()
                );
                Uuid::new_v5(&OBSERVATION_NAMESPACE, name.as_bytes()).to_string()
            });

        let interactions = likes.saturating_add(comments).saturating_add(shares);
        let engagement_rate = interactions as f64 / views.max(1) as f64;

        Ok(EngagementObservation {
            observation_id,
            user_id,
            content_id,
            platform,
            content_type,
            time_bucket: TimeBucket::from_datetime(&published_at),
            published_at,
            views,
            likes,
            comments,
            shares,
            engagement_rate,
            tags: normalize_tags(&raw.tags),
        })
    }
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = tags
        .iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, StoreError};
    use crate::models::ContentId;
    use crate::services::store::StoreResult;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use mockall::mock;

    mock! {
        pub Catalog {}

        #[async_trait]
        impl ContentCatalog for Catalog {
            async fn content_type(&self, content_id: ContentId) -> StoreResult<Option<ContentType>>;
        }
    }

    fn ingestor() -> ObservationIngestor {
        ObservationIngestor::new(Arc::new(StaticContentCatalog::new()), RetryConfig::default())
    }

    fn valid_event() -> RawEngagementEvent {
        RawEngagementEvent {
            observation_id: Some("obs-1".to_string()),
            user_id: Some(Uuid::new_v4()),
            content_id: Some(Uuid::new_v4()),
            platform: Some("LinkedIn".to_string()),
            content_type: Some("Educational".to_string()),
            // Tuesday
            published_at: Some(Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap()),
            views: Some(1000),
            likes: Some(50),
            comments: Some(20),
            shares: Some(10),
            tags: vec![" AI ".to_string(), "career".to_string(), "ai".to_string()],
        }
    }

    fn validation_error(result: Result<EngagementObservation>) -> ValidationError {
        match result {
            Err(EngineError::Validation(err)) => err,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_normalizes_valid_event() {
        let observation = tokio_test::block_on(ingestor().normalize(valid_event())).unwrap();

        assert_eq!(observation.platform.as_str(), "linkedin");
        assert_eq!(observation.content_type.as_str(), "educational");
        assert_eq!(observation.time_bucket, TimeBucket::new(2, 9).unwrap());
        assert!((observation.engagement_rate - 0.08).abs() < 1e-12);
        assert_eq!(observation.tags, vec!["ai".to_string(), "career".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let mut event = valid_event();
        event.user_id = None;
        assert_eq!(
            validation_error(ingestor().normalize(event).await),
            ValidationError::MissingField("user_id")
        );

        let mut event = valid_event();
        event.platform = Some("   ".to_string());
        assert_eq!(
            validation_error(ingestor().normalize(event).await),
            ValidationError::MissingField("platform")
        );

        let mut event = valid_event();
        event.published_at = None;
        assert_eq!(
            validation_error(ingestor().normalize(event).await),
            ValidationError::MissingField("published_at")
        );
    }

    #[tokio::test]
    async fn test_metrics_validation() {
        let mut event = valid_event();
        event.views = None;
        event.likes = None;
        event.comments = None;
        event.shares = None;
        assert_eq!(
            validation_error(ingestor().normalize(event).await),
            ValidationError::NoMetrics
        );

        let mut event = valid_event();
        event.comments = Some(-3);
        assert_eq!(
            validation_error(ingestor().normalize(event).await),
            ValidationError::NegativeMetric {
                field: "comments",
                value: -3
            }
        );
    }

    #[tokio::test]
    async fn test_zero_views_does_not_divide_by_zero() {
        let mut event = valid_event();
        event.views = None;
        event.likes = Some(3);
        event.comments = None;
        event.shares = None;

        let observation = ingestor().normalize(event).await.unwrap();
        assert_eq!(observation.views, 0);
        assert!((observation.engagement_rate - 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_huge_metrics_saturate() {
        let mut event = valid_event();
        event.views = Some(1);
        event.likes = Some(i64::MAX);
        event.comments = Some(i64::MAX);
        event.shares = Some(i64::MAX);

        let observation = ingestor().normalize(event).await.unwrap();
        assert_eq!(observation.interactions(), u64::MAX);
        assert!(observation.engagement_rate.is_finite());
        assert!(observation.engagement_rate > 1.0);
    }

    #[tokio::test]
    async fn test_derived_observation_id_is_stable() {
        let mut event = valid_event();
        event.observation_id = None;

        let first = ingestor().normalize(event.clone()).await.unwrap();
        let second = ingestor().normalize(event).await.unwrap();
        assert_eq!(first.observation_id, second.observation_id);
        assert!(Uuid::parse_str(&first.observation_id).is_ok());
    }

    #[tokio::test]
    async fn test_content_type_from_catalog() {
        let mut event = valid_event();
        event.content_type = None;
        let content_id = event.content_id.unwrap();

        let mut catalog = MockCatalog::new();
        catalog
            .expect_content_type()
            .withf(move |id| *id == content_id)
            .times(1)
            .returning(|_| Ok(Some(ContentType::new("news"))));

        let ingestor = ObservationIngestor::new(Arc::new(catalog), RetryConfig::default());
        let observation = ingestor.normalize(event).await.unwrap();
        assert_eq!(observation.content_type.as_str(), "news");
    }

    #[tokio::test]
    async fn test_unknown_content_type_is_rejected() {
        let mut event = valid_event();
        event.content_type = None;
        let content_id = event.content_id.unwrap();

        assert_eq!(
            validation_error(ingestor().normalize(event).await),
            ValidationError::UnknownContentType(content_id)
        );
    }

    #[tokio::test]
    async fn test_catalog_outage_is_a_store_failure() {
        let mut event = valid_event();
        event.content_type = None;

        let mut catalog = MockCatalog::new();
        catalog
            .expect_content_type()
            .returning(|_| Err(StoreError::Unavailable("catalog down".to_string())));

        let retry = RetryConfig {
            max_retries: 1,
            initial_backoff: std::time::Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        };
        let ingestor = ObservationIngestor::new(Arc::new(catalog), retry);
        assert!(matches!(
            ingestor.normalize(event).await,
            Err(EngineError::Store(_))
        ));
    }
}

// ============================================
// Aggregate Refresh Job (分析快照刷新任務)
// ============================================
//
// Periodically rebuilds the cached aggregate snapshot of every user with
// recorded history, so incremental updates that raced with a rebuild are
// eventually corrected.
//
// Workflow:
// 1. List users from the history repository
// 2. Rebuild snapshots with bounded concurrency
// 3. Purge expired idempotency claims

use crate::error::Result;
use crate::services::FeedbackLoopEngine;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Statistics of one refresh pass
#[derive(Debug, Clone, Default)]
pub struct RefreshStats {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub users_processed: u32,
    pub users_succeeded: u32,
    pub users_failed: u32,
    pub claims_purged: usize,
    pub total_duration_ms: u64,
}

pub struct AggregateRefreshJob {
    engine: Arc<FeedbackLoopEngine>,
    interval: Duration,
    concurrency: usize,
}

impl AggregateRefreshJob {
    pub fn new(engine: Arc<FeedbackLoopEngine>) -> Self {
        let analytics = &engine.config().analytics;
        let interval = Duration::from_secs(analytics.refresh_interval_secs);
        let concurrency = analytics.refresh_concurrency.max(1);

        Self {
            engine,
            interval,
            concurrency,
        }
    }

    /// One pass over all known users
    pub async fn run_once(&self) -> Result<RefreshStats> {
        let started = Instant::now();
        let mut stats = RefreshStats {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        let users = self.engine.known_users().await?;
        let results: Vec<_> = stream::iter(users)
            .map(|user_id| {
                let engine = self.engine.clone();
                async move { (user_id, engine.refresh_user_aggregates(user_id).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (user_id, result) in results {
            stats.users_processed += 1;
            match result {
                Ok(()) => stats.users_succeeded += 1,
                Err(e) => {
                    stats.users_failed += 1;
                    warn!(user_id = %user_id, error = %e, "Failed to refresh aggregates");
                }
            }
        }

        stats.claims_purged = self.engine.purge_expired_claims();
        stats.completed_at = Some(Utc::now());
        stats.total_duration_ms = started.elapsed().as_millis() as u64;

        info!(
            users_processed = stats.users_processed,
            users_succeeded = stats.users_succeeded,
            users_failed = stats.users_failed,
            claims_purged = stats.claims_purged,
            duration_ms = stats.total_duration_ms,
            "Aggregate refresh pass completed"
        );
        Ok(stats)
    }

    /// Run passes on the configured interval until `shutdown` flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            concurrency = self.concurrency,
            "Starting aggregate refresh job"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Aggregate refresh pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Aggregate refresh job stopped");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::RawEngagementEvent;
    use crate::services::ingest::StaticContentCatalog;
    use crate::utils::SystemClock;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn engine() -> Arc<FeedbackLoopEngine> {
        Arc::new(FeedbackLoopEngine::in_memory(
            EngineConfig::default(),
            Arc::new(StaticContentCatalog::new()),
            Arc::new(SystemClock),
        ))
    }

    fn event(user_id: Uuid, id: &str) -> RawEngagementEvent {
        RawEngagementEvent {
            observation_id: Some(id.to_string()),
            user_id: Some(user_id),
            content_id: Some(Uuid::new_v4()),
            platform: Some("twitter".to_string()),
            content_type: Some("news".to_string()),
            published_at: Some(Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()),
            views: Some(200),
            likes: Some(10),
            comments: Some(2),
            shares: None,
            tags: vec!["breaking".to_string()],
        }
    }

    #[tokio::test]
    async fn test_run_once_rebuilds_every_user() {
        let engine = engine();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        engine.ingest(event(alice, "a-1")).await.unwrap();
        engine.ingest(event(bob, "b-1")).await.unwrap();

        let job = AggregateRefreshJob::new(engine.clone());
        let stats = job.run_once().await.unwrap();

        assert_eq!(stats.users_processed, 2);
        assert_eq!(stats.users_succeeded, 2);
        assert_eq!(stats.users_failed, 0);
        assert!(engine.get_insights(alice, None).await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let job = AggregateRefreshJob::new(engine());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(job.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

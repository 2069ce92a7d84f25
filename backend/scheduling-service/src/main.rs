use anyhow::Context;
use redis::aio::ConnectionManager;
use scheduling_service::jobs::AggregateRefreshJob;
use scheduling_service::services::store::{RedisHistoryRepository, RedisModelRepository};
use scheduling_service::utils::SystemClock;
use scheduling_service::{
    EngineConfig, FeedbackLoopEngine, IngestStatus, RawEngagementEvent, StaticContentCatalog,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Default)]
struct IngestTally {
    applied: u64,
    duplicates: u64,
    rejected: u64,
    failed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env().context("Failed to load config")?;
    init_tracing(&config);

    info!(
        service = %config.service_name,
        redis = config.store.redis_url.is_some(),
        "Starting scheduling engine worker"
    );

    let catalog = Arc::new(StaticContentCatalog::new());
    let clock = Arc::new(SystemClock);
    let engine = match config.store.redis_url.clone() {
        Some(url) => {
            let client = redis::Client::open(url).context("Failed to create Redis client")?;
            let manager = ConnectionManager::new(client)
                .await
                .context("Failed to connect to Redis")?;
            let prefix = config.store.key_prefix.clone();
            FeedbackLoopEngine::new(
                config,
                Arc::new(RedisModelRepository::new(manager.clone(), prefix.clone())),
                Arc::new(RedisHistoryRepository::new(manager, prefix)),
                catalog,
                clock,
            )
        }
        None => {
            warn!("No Redis URL configured - state is kept in memory only");
            FeedbackLoopEngine::in_memory(config, catalog, clock)
        }
    };
    let engine = Arc::new(engine);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresh = tokio::spawn(AggregateRefreshJob::new(engine.clone()).run(shutdown_rx));

    // Newline-delimited JSON engagement events on stdin
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tally = IngestTally::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => process_line(&engine, &line, &mut tally).await,
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read input");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    refresh.await.context("Aggregate refresh job panicked")?;

    info!(
        applied = tally.applied,
        duplicates = tally.duplicates,
        rejected = tally.rejected,
        failed = tally.failed,
        "Scheduling engine worker stopped"
    );
    Ok(())
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn process_line(engine: &FeedbackLoopEngine, line: &str, tally: &mut IngestTally) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let raw: RawEngagementEvent = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            tally.rejected += 1;
            warn!(error = %e, "Skipping malformed event");
            return;
        }
    };

    match engine.ingest(raw).await {
        Ok(ingested) => match ingested.status {
            IngestStatus::Applied => tally.applied += 1,
            IngestStatus::Duplicate => {
                tally.duplicates += 1;
                debug!(
                    observation_id = %ingested.observation.observation_id,
                    "Duplicate event"
                );
            }
        },
        Err(e) if e.is_validation() => {
            tally.rejected += 1;
            warn!(error = %e, "Rejected event");
        }
        Err(e) => {
            tally.failed += 1;
            error!(error = %e, "Failed to ingest event");
        }
    }
}

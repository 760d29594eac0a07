//! Squat Coach - video technique analysis service
//!
//! Accepts squat videos per user, runs pose analysis on a bounded worker
//! pool and records captioned results as training data.

use anyhow::Result;
use coach_lib::{
    analysis::CommandAnalyzer,
    dataset::JsonlDatasetRecorder,
    health::HealthRegistry,
    observability::StructuredLogger,
    pipeline::PipelineOrchestrator,
    rate_limit::RateLimiter,
    service::AnalysisService,
    storage::UploadStore,
    worker_pool::WorkerPool,
};
use squat_coach::{api, config::ServiceConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Queue depth, in multiples of pool capacity, reported as degraded
const POOL_BACKLOG_LIMIT: usize = 4;

/// Frame directories older than this belong to no running job
const STALE_FRAMES_AGE: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ServiceConfig::load()?;
    info!(instance = %config.instance_name, port = config.api_port, "Squat coach configured");

    let health_registry = HealthRegistry::new();
    health_registry.register_defaults().await;

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(SERVICE_VERSION, config.worker_capacity);

    let pool = Arc::new(WorkerPool::new(config.worker_capacity));
    let orchestrator = PipelineOrchestrator::new(
        pool.clone(),
        Arc::new(CommandAnalyzer::new(config.analyzer())),
        Arc::new(JsonlDatasetRecorder::new(&config.dataset_dir)),
        config.pipeline(),
    )
    .with_health(health_registry.clone())
    .with_logger(logger.clone());

    let service = Arc::new(AnalysisService::new(
        RateLimiter::new(config.rate_limit()),
        Arc::new(orchestrator),
        config.submission_limits(),
        logger.clone(),
    ));

    // Periodic housekeeping: purge idle rate windows and stale frames,
    // refresh pool health
    let housekeeping = {
        let service = service.clone();
        let health = health_registry.clone();
        let pool = pool.clone();
        let mut ticker = tokio::time::interval(config.sweep_interval());
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                let purged = service.sweep();
                debug!(purged, "Swept rate limit windows");
                service.orchestrator().sweep_frames(STALE_FRAMES_AGE).await;
                health.report_pool(&pool, POOL_BACKLOG_LIMIT).await;
            }
        })
    };

    let app_state = Arc::new(api::AppState::new(
        service.clone(),
        UploadStore::new(&config.upload_dir),
        health_registry.clone(),
    ));
    health_registry.set_ready(true).await;

    api::serve(config.api_port, app_state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    housekeeping.abort();
    service.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

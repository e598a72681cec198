//! Generation pipeline worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use reelgen_queue::{CheckpointStore, JobLease, JobQueue, ProgressStore, RedisStateStore, StateStore};
use reelgen_services::{ContentClient, RenderFarmClient};
use reelgen_worker::{
    build_registry, init_tracing, metrics, ContentJobStore, JobExecutor, JobStore, PipelineDriver,
    RetryCoordinator, RetryPolicy, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting reelgen-worker");

    let config = WorkerConfig::from_env();
    config.validate().context("invalid worker configuration")?;
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::install_exporter(port).context("failed to start metrics exporter")?;
        info!("Serving metrics on port {}", port);
    }

    let queue = JobQueue::from_env().context("failed to create job queue")?;
    let store: Arc<dyn StateStore> = Arc::new(
        RedisStateStore::new(&queue.config().redis_url).context("failed to create state store")?,
    );

    let checkpoints = CheckpointStore::with_ttl(Arc::clone(&store), config.checkpoint_ttl);
    let progress = ProgressStore::with_ttl(Arc::clone(&store), config.progress_ttl);
    let lease = JobLease::new(Arc::clone(&store), config.lease_ttl);

    let content = ContentClient::from_env().context("failed to create content client")?;
    let render_farm = RenderFarmClient::from_env().context("failed to create render farm client")?;
    let jobs: Arc<dyn JobStore> = Arc::new(ContentJobStore::new(content.clone()));

    let registry = build_registry(content, render_farm, Arc::clone(&jobs), &config)?;
    let driver = PipelineDriver::new(Arc::new(registry), checkpoints.clone(), progress.clone());
    let policy = RetryPolicy::new(config.max_attempts)
        .with_step(config.retry_step)
        .with_max_delay(config.retry_max_delay);
    let coordinator = RetryCoordinator::new(driver, checkpoints, progress, jobs, lease, policy);

    let executor = Arc::new(JobExecutor::new(config, queue, coordinator));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        return Err(e.into());
    }

    info!("Worker stopped");
    Ok(())
}

//! Job executor.
//!
//! Pulls deliveries from the queue with bounded concurrency, runs each
//! through the retry coordinator and settles the delivery: ack on success,
//! scheduled redelivery on a retryable failure, DLQ otherwise.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reelgen_models::sanitize_error_text;
use reelgen_queue::{Delivery, JobQueue};

use crate::config::WorkerConfig;
use crate::coordinator::{AttemptOutcome, RetryCoordinator};
use crate::error::{WorkerError, WorkerResult};
use crate::retry::FailureTracker;

/// Deliveries read per consume call, at most.
const MAX_BATCH: usize = 5;

/// Everything a spawned delivery task needs.
struct DeliveryContext {
    queue: Arc<JobQueue>,
    coordinator: Arc<RetryCoordinator>,
    consumer_name: String,
    heartbeat_interval: Duration,
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    ctx: Arc<DeliveryContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: JobQueue, coordinator: RetryCoordinator) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let ctx = Arc::new(DeliveryContext {
            queue: Arc::new(queue),
            coordinator: Arc::new(coordinator),
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            heartbeat_interval: config.job_heartbeat_interval,
        });

        Self {
            config,
            ctx,
            job_semaphore,
            shutdown,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.ctx.consumer_name
    }

    /// Start the executor. Returns after [`JobExecutor::shutdown`] once
    /// in-flight jobs finished or the shutdown timeout passed.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.ctx.consumer_name, self.config.max_concurrent_jobs
        );

        self.ctx.queue.init().await?;

        let claim_task = tokio::spawn(Self::claim_loop(
            Arc::clone(&self.ctx),
            Arc::clone(&self.job_semaphore),
            self.shutdown.subscribe(),
            self.config.claim_interval,
            self.config.claim_min_idle,
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}; they will be reclaimed by another worker",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .ctx
            .queue
            .consume(&self.ctx.consumer_name, 1000, available.min(MAX_BATCH))
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", deliveries.len());

        for delivery in deliveries {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;
            Self::spawn_delivery(Arc::clone(&self.ctx), delivery, permit);
        }

        Ok(())
    }

    /// Periodically pick up due retries and deliveries orphaned by crashed
    /// workers.
    async fn claim_loop(
        ctx: Arc<DeliveryContext>,
        semaphore: Arc<Semaphore>,
        mut shutdown_rx: watch::Receiver<bool>,
        interval: Duration,
        orphan_min_idle: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let available = semaphore.available_permits();
                    if available == 0 {
                        continue;
                    }

                    match ctx.queue.claim_due(&ctx.consumer_name, orphan_min_idle, available).await {
                        Ok(deliveries) => {
                            failures.record_success();
                            if !deliveries.is_empty() {
                                info!("Claimed {} pending jobs", deliveries.len());
                            }
                            for delivery in deliveries {
                                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                    return;
                                };
                                Self::spawn_delivery(Arc::clone(&ctx), delivery, permit);
                            }
                        }
                        Err(e) => {
                            if failures.record_failure() {
                                warn!("Failed to claim pending jobs: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    fn spawn_delivery(ctx: Arc<DeliveryContext>, delivery: Delivery, permit: OwnedSemaphorePermit) {
        tokio::spawn(async move {
            let _permit = permit;
            Self::execute_delivery(ctx, delivery).await;
        });
    }

    /// Run one delivery and settle it with the queue.
    async fn execute_delivery(ctx: Arc<DeliveryContext>, delivery: Delivery) {
        let job_id = delivery.job.job_id.clone();
        info!(
            job_id = %job_id,
            attempt = delivery.attempt_number(),
            "Executing job"
        );

        let heartbeat = tokio::spawn(Self::heartbeat(
            Arc::clone(&ctx.queue),
            ctx.consumer_name.clone(),
            delivery.message_id.clone(),
            ctx.heartbeat_interval,
        ));

        let result = ctx.coordinator.run_attempt(&delivery).await;
        heartbeat.abort();

        let settled = match result {
            Ok(AttemptOutcome::Completed) => {
                info!(job_id = %job_id, "Job completed successfully");
                ctx.queue.ack(&delivery.message_id).await
            }
            Ok(AttemptOutcome::AlreadyTerminal(status)) => {
                info!(job_id = %job_id, %status, "Job already terminal, acknowledging");
                ctx.queue.ack(&delivery.message_id).await
            }
            Ok(AttemptOutcome::Deferred) => {
                // Left pending; reclaimed once idle past the orphan threshold.
                debug!(job_id = %job_id, "Job deferred");
                Ok(())
            }
            Err(failure) if failure.will_retry => {
                match ctx.queue.schedule_retry(&delivery.message_id).await {
                    Ok(delay) => {
                        info!(
                            job_id = %job_id,
                            attempt = failure.attempt,
                            "Job will be retried in {:?}", delay
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Err(failure) => {
                warn!(
                    job_id = %job_id,
                    attempt = failure.attempt,
                    "Job failed permanently, moving to DLQ"
                );
                ctx.queue
                    .dlq(&delivery, &sanitize_error_text(&failure.to_string()))
                    .await
            }
        };

        if let Err(e) = settled {
            error!(job_id = %job_id, "Failed to settle delivery: {}", e);
        }
    }

    /// Keep the delivery owned by this consumer while it runs.
    async fn heartbeat(
        queue: Arc<JobQueue>,
        consumer_name: String,
        message_id: String,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        let mut failures = FailureTracker::new(3);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match queue.touch(&consumer_name, &message_id).await {
                Ok(()) => failures.record_success(),
                Err(e) => {
                    if failures.record_failure() {
                        warn!(message_id = %message_id, "Job heartbeat failed: {}", e);
                    }
                }
            }
        }
    }

    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

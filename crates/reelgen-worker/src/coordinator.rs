//! Retry coordinator: one delivered attempt of a job.
//!
//! The queue owns the attempt counter and the timing of redeliveries. The
//! coordinator turns a delivery into a driver run, decides whether a failure
//! is eligible for another attempt, and reconciles final failure into the
//! durable job record.

use std::sync::Arc;

use reelgen_models::{next_stage, JobStatus, ProgressRecord, Stage};
use reelgen_queue::{CheckpointStore, Delivery, JobLease, LeaseAcquisition, ProgressStore};
use thiserror::Error;
use tracing::Instrument;

use crate::classifier::{failure_category, is_retryable};
use crate::driver::{DriverOutcome, PipelineDriver, StageFailure};
use crate::error::StageError;
use crate::job_store::JobStore;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::RetryPolicy;

/// How an attempt ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The pipeline finished (or had already finished).
    Completed,
    /// The durable record is already terminal; nothing ran.
    AlreadyTerminal(JobStatus),
    /// Another attempt holds the job's lease; nothing ran and no attempt was
    /// used. The delivery should be left for later.
    Deferred,
}

/// A failed attempt.
#[derive(Debug, Error)]
#[error("attempt {attempt} failed at {stage}: {error}")]
pub struct AttemptFailure {
    pub stage: Stage,
    #[source]
    pub error: StageError,
    /// 1-based attempt number
    pub attempt: u32,
    /// Whether the queue should redeliver
    pub will_retry: bool,
}

pub struct RetryCoordinator {
    driver: PipelineDriver,
    checkpoints: CheckpointStore,
    progress: ProgressStore,
    jobs: Arc<dyn JobStore>,
    lease: JobLease,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(
        driver: PipelineDriver,
        checkpoints: CheckpointStore,
        progress: ProgressStore,
        jobs: Arc<dyn JobStore>,
        lease: JobLease,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            driver,
            checkpoints,
            progress,
            jobs,
            lease,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one attempt for a delivery.
    pub async fn run_attempt(&self, delivery: &Delivery) -> Result<AttemptOutcome, AttemptFailure> {
        let job_id = &delivery.job.job_id;
        let logger = JobLogger::new(job_id, delivery.attempt_number());

        match self.jobs.get_job(job_id).await {
            Ok(Some(job)) if job.is_terminal() => {
                logger.log_warning(&format!("job is already {}, skipping", job.status));
                return Ok(AttemptOutcome::AlreadyTerminal(job.status));
            }
            Ok(Some(_)) => {}
            Ok(None) => logger.log_warning("no durable job record found, running anyway"),
            Err(e) => logger.log_warning(&format!("could not read job record: {}", e)),
        }

        let lease = match self.lease.acquire(job_id).await {
            LeaseAcquisition::Acquired(lease) => Some(lease),
            LeaseAcquisition::Held => {
                logger.log_warning("another attempt holds the job lease, deferring");
                return Ok(AttemptOutcome::Deferred);
            }
            LeaseAcquisition::Unavailable => None,
        };

        let result = self
            .attempt(delivery, &logger)
            .instrument(logger.create_span())
            .await;

        if let Some(lease) = lease {
            self.lease.release(lease).await;
        }

        result
    }

    async fn attempt(
        &self,
        delivery: &Delivery,
        logger: &JobLogger,
    ) -> Result<AttemptOutcome, AttemptFailure> {
        let job_id = &delivery.job.job_id;
        let owner_id = delivery.job.owner_id.as_str();
        let attempt = delivery.attempt_number();

        if delivery.attempts_made > 0 {
            let checkpoint = self.checkpoints.get(job_id).await;
            if let Some(stage) = next_stage(checkpoint.as_ref()).stage() {
                self.progress
                    .publish(&ProgressRecord::retrying(
                        job_id,
                        owner_id,
                        stage,
                        delivery.attempts_made,
                        self.policy.max_retries(),
                    ))
                    .await;
                metrics::record_attempt_retried(stage);
            }

            let delay = self.policy.delay_for(delivery.attempts_made);
            logger.log_start(&format!(
                "retry attempt {} of {}, waiting {:?}",
                attempt, self.policy.max_attempts, delay
            ));
            tokio::time::sleep(delay).await;
        }

        match self.driver.run(job_id, owner_id, logger).await {
            Ok(outcome) => {
                if outcome == DriverOutcome::AlreadyComplete {
                    self.progress
                        .publish(&ProgressRecord::completed(job_id, owner_id))
                        .await;
                }
                metrics::record_job_completed();
                Ok(AttemptOutcome::Completed)
            }
            Err(StageFailure { stage, error }) => {
                let retryable = is_retryable(&error);
                let will_retry = retryable && self.policy.has_attempts_left(attempt);
                let message = error.to_string();
                let category = failure_category(&message);

                let mut record =
                    ProgressRecord::failed(job_id, owner_id, Some(stage), category, message.as_str());
                if will_retry {
                    record = record.with_retry(attempt, self.policy.max_retries());
                }
                self.progress.publish(&record).await;

                if will_retry {
                    logger.log_warning(&format!(
                        "attempt {} failed at {}, will retry: {}",
                        attempt, stage, message
                    ));
                } else {
                    logger.log_error(&format!(
                        "attempt {} failed at {}, giving up (retryable: {}): {}",
                        attempt, stage, retryable, message
                    ));
                    if let Err(e) = self.jobs.mark_failed(job_id, category.user_message()).await {
                        logger.log_error(&format!("failed to mark job failed: {}", e));
                    }
                    metrics::record_job_failed(stage, retryable);
                }

                Err(AttemptFailure {
                    stage,
                    error,
                    attempt,
                    will_retry,
                })
            }
        }
    }
}

//! Pipeline driver.
//!
//! Runs the remaining stages of one job in fixed order, resuming from the
//! checkpoint. Each completed stage is checkpointed only after its executor
//! returned, i.e. after its output is durable. The driver reports failures
//! but never decides whether to retry.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use reelgen_models::{JobId, NextStage, ProgressRecord, Stage};
use reelgen_queue::{CheckpointStore, ProgressStore};

use crate::classifier::failure_category;
use crate::error::StageError;
use crate::logging::JobLogger;
use crate::metrics;
use crate::stages::StageRegistry;

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    /// Stages ran and the last one was render.
    Completed,
    /// The checkpoint already had every stage complete; nothing ran.
    AlreadyComplete,
}

/// A stage failed during this run.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: StageError,
}

#[derive(Clone)]
pub struct PipelineDriver {
    stages: Arc<StageRegistry>,
    checkpoints: CheckpointStore,
    progress: ProgressStore,
}

impl PipelineDriver {
    pub fn new(
        stages: Arc<StageRegistry>,
        checkpoints: CheckpointStore,
        progress: ProgressStore,
    ) -> Self {
        Self {
            stages,
            checkpoints,
            progress,
        }
    }

    /// Run the job from its resume point through render.
    pub async fn run(
        &self,
        job_id: &JobId,
        owner_id: &str,
        logger: &JobLogger,
    ) -> Result<DriverOutcome, StageFailure> {
        let checkpoint = self.checkpoints.get(job_id).await;
        let resume_from = match reelgen_models::next_stage(checkpoint.as_ref()) {
            NextStage::Run(stage) => stage,
            NextStage::Complete => {
                logger.log_warning("checkpoint reports every stage complete, nothing to run");
                self.checkpoints.delete(job_id).await;
                return Ok(DriverOutcome::AlreadyComplete);
            }
        };

        logger.log_start(&format!("resuming at {}", resume_from));

        for stage in &Stage::ALL[resume_from.index()..] {
            let stage = *stage;

            // A concurrent run may have finished this stage since we looked.
            if let Some(current) = self.checkpoints.get(job_id).await {
                if current.is_completed(stage) {
                    logger.log_stage_skipped(stage);
                    continue;
                }
            }

            self.progress
                .publish(&ProgressRecord::stage_started(job_id, owner_id, stage))
                .await;
            logger.log_stage_started(stage);

            let started = Instant::now();
            match self.stages.get(stage).run(job_id).await {
                Ok(()) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    self.checkpoints.mark_completed(job_id, owner_id, stage).await;
                    metrics::record_stage_completed(stage, elapsed);
                    logger.log_stage_completed(stage, elapsed);
                }
                Err(error) => {
                    self.checkpoints.mark_failed(job_id, owner_id, stage).await;

                    let message = error.to_string();
                    self.progress
                        .publish(&ProgressRecord::failed(
                            job_id,
                            owner_id,
                            Some(stage),
                            failure_category(&message),
                            message.as_str(),
                        ))
                        .await;
                    metrics::record_stage_failed(stage);
                    logger.log_stage_failed(stage, &message);

                    return Err(StageFailure { stage, error });
                }
            }
        }

        self.checkpoints.delete(job_id).await;
        self.progress
            .publish(&ProgressRecord::completed(job_id, owner_id))
            .await;
        logger.log_completion("all stages finished");

        Ok(DriverOutcome::Completed)
    }
}

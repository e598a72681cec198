//! Status read path for polling clients.
//!
//! The progress record is consulted first; when it is missing or expired the
//! durable job record answers instead. A missing progress record never means
//! the job failed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use reelgen_models::{
    Checkpoint, CompletedSteps, JobId, JobStatus, ProgressStatus, Stage,
};
use reelgen_queue::{CheckpointStore, ProgressStore};

use crate::error::WorkerResult;
use crate::job_store::JobStore;

/// What a client sees when polling a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    /// Progress status (`script` … `error`) or durable status
    /// (`processing`, `failed`, `complete`)
    pub status: String,
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub completed_steps: CompletedSteps,
    pub updated_at: DateTime<Utc>,
}

pub struct StatusReader {
    progress: ProgressStore,
    checkpoints: CheckpointStore,
    jobs: Arc<dyn JobStore>,
}

impl StatusReader {
    pub fn new(progress: ProgressStore, checkpoints: CheckpointStore, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            progress,
            checkpoints,
            jobs,
        }
    }

    /// Current status of `job_id` as seen by `owner_id`. `None` if the job is
    /// unknown or belongs to someone else.
    pub async fn get_status(
        &self,
        job_id: &JobId,
        owner_id: &str,
    ) -> WorkerResult<Option<JobStatusView>> {
        let checkpoint = self.checkpoints.get(job_id).await;

        if let Some(record) = self.progress.read(job_id).await {
            if record.owner_id != owner_id {
                return Ok(None);
            }
            let finished = record.status == ProgressStatus::Completed;
            return Ok(Some(JobStatusView {
                job_id: record.job_id,
                status: record.status.as_str().to_string(),
                step: record.step,
                current_step_id: record.current_step_id,
                retry_count: record.retry_count,
                max_retries: record.max_retries,
                error: record.error,
                last_error: record.last_error,
                retry_reason: record.retry_reason,
                video_url: None,
                completed_steps: completed_steps(checkpoint.as_ref(), finished),
                updated_at: record.updated_at,
            }));
        }

        let Some(job) = self.jobs.get_job(job_id).await? else {
            return Ok(None);
        };
        if job.owner_id != owner_id {
            return Ok(None);
        }

        let step = match job.status {
            JobStatus::Processing => "Queued",
            JobStatus::Failed => "Failed",
            JobStatus::Complete => "Video ready",
        };

        Ok(Some(JobStatusView {
            job_id: job.id,
            status: job.status.as_str().to_string(),
            step: step.to_string(),
            current_step_id: None,
            retry_count: None,
            max_retries: None,
            error: job.error_message,
            last_error: None,
            retry_reason: None,
            video_url: job.video_url,
            completed_steps: completed_steps(
                checkpoint.as_ref(),
                job.status == JobStatus::Complete,
            ),
            updated_at: job.updated_at,
        }))
    }
}

fn completed_steps(checkpoint: Option<&Checkpoint>, finished: bool) -> CompletedSteps {
    match checkpoint {
        Some(checkpoint) => checkpoint.steps(),
        None if finished => Checkpoint::finished_steps(),
        None => Checkpoint::pending_steps(),
    }
}

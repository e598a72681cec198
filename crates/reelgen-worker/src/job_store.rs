//! Durable job record seam.

use async_trait::async_trait;

use reelgen_models::{Job, JobId};

use crate::error::StageResult;

/// The external store that owns job records and stage outputs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_id: &JobId) -> StageResult<Option<Job>>;

    /// Raw caption payload written by the captions stage, if any.
    async fn load_captions(&self, job_id: &JobId) -> StageResult<Option<serde_json::Value>>;

    /// Record the final video URL; the job becomes `complete`.
    async fn complete(&self, job_id: &JobId, video_url: &str) -> StageResult<()>;

    /// The job becomes `failed`; no further attempts will run.
    async fn mark_failed(&self, job_id: &JobId, error: &str) -> StageResult<()>;
}

//! Render stage: submit to the render farm and poll until done.
//!
//! Polling is bounded by a maximum wait. Running out of time is reported as
//! [`StageError::RenderTimedOut`], which is never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use reelgen_models::{render_duration_secs, JobId, Stage};

use crate::error::{StageError, StageResult};
use crate::job_store::JobStore;
use crate::stages::StageExecutor;

/// One poll of a submitted render.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderPoll {
    Pending,
    Done { video_url: String },
    Failed { reason: String },
}

#[async_trait]
pub trait RenderFarm: Send + Sync {
    /// Submit a render and return the farm's render id.
    async fn submit(&self, job_id: &JobId, duration_secs: f64) -> StageResult<String>;

    async fn poll(&self, render_id: &str) -> StageResult<RenderPoll>;
}

pub struct RenderStage {
    farm: Arc<dyn RenderFarm>,
    jobs: Arc<dyn JobStore>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl RenderStage {
    pub fn new(
        farm: Arc<dyn RenderFarm>,
        jobs: Arc<dyn JobStore>,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Self {
        Self {
            farm,
            jobs,
            poll_interval,
            max_wait,
        }
    }

    /// Render the job and record the final URL. Returns the URL.
    pub async fn render(&self, job_id: &JobId) -> StageResult<String> {
        let captions = self.jobs.load_captions(job_id).await?;
        let duration_secs = render_duration_secs(captions.as_ref());

        let render_id = self.farm.submit(job_id, duration_secs).await?;
        info!(job_id = %job_id, render_id = %render_id, duration_secs, "Render submitted");

        let video_url = self.wait_for(&render_id).await?;
        self.jobs.complete(job_id, &video_url).await?;

        Ok(video_url)
    }

    async fn wait_for(&self, render_id: &str) -> StageResult<String> {
        let started = Instant::now();
        let deadline = started + self.max_wait;

        loop {
            match self.farm.poll(render_id).await? {
                RenderPoll::Done { video_url } => return Ok(video_url),
                RenderPoll::Failed { reason } => return Err(StageError::RenderFailed(reason)),
                RenderPoll::Pending => {}
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(StageError::RenderTimedOut {
                    render_id: render_id.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            debug!(render_id, "Render still in progress");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl StageExecutor for RenderStage {
    fn stage(&self) -> Stage {
        Stage::Render
    }

    async fn run(&self, job_id: &JobId) -> StageResult<()> {
        self.render(job_id).await.map(|_| ())
    }
}

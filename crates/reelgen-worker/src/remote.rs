//! HTTP-backed collaborators: stage executors, the job record store and the
//! render farm, all talking to the external platform via `reelgen-services`.

use std::sync::Arc;

use async_trait::async_trait;

use reelgen_models::{Job, JobId, Stage};
use reelgen_services::{ContentClient, RenderFarmClient, RenderRequest, RenderState};

use crate::config::WorkerConfig;
use crate::error::{ConfigError, StageError, StageResult};
use crate::job_store::JobStore;
use crate::render::{RenderFarm, RenderPoll, RenderStage};
use crate::stages::{StageExecutor, StageRegistry};

/// A generation stage run by the content platform.
pub struct RemoteStage {
    stage: Stage,
    client: ContentClient,
}

impl RemoteStage {
    pub fn new(stage: Stage, client: ContentClient) -> Self {
        Self { stage, client }
    }
}

#[async_trait]
impl StageExecutor for RemoteStage {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn run(&self, job_id: &JobId) -> StageResult<()> {
        self.client.run_stage(job_id, self.stage).await?;
        Ok(())
    }
}

/// Job records held by the content platform.
pub struct ContentJobStore {
    client: ContentClient,
}

impl ContentJobStore {
    pub fn new(client: ContentClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobStore for ContentJobStore {
    async fn get_job(&self, job_id: &JobId) -> StageResult<Option<Job>> {
        Ok(self.client.get_job(job_id).await?)
    }

    async fn load_captions(&self, job_id: &JobId) -> StageResult<Option<serde_json::Value>> {
        Ok(self.client.get_captions(job_id).await?)
    }

    async fn complete(&self, job_id: &JobId, video_url: &str) -> StageResult<()> {
        Ok(self.client.complete_job(job_id, video_url).await?)
    }

    async fn mark_failed(&self, job_id: &JobId, error: &str) -> StageResult<()> {
        Ok(self.client.fail_job(job_id, error).await?)
    }
}

#[async_trait]
impl RenderFarm for RenderFarmClient {
    async fn submit(&self, job_id: &JobId, duration_secs: f64) -> StageResult<String> {
        let submission = RenderFarmClient::submit(
            self,
            &RenderRequest {
                job_id: job_id.clone(),
                duration_secs,
            },
        )
        .await?;
        Ok(submission.render_id)
    }

    async fn poll(&self, render_id: &str) -> StageResult<RenderPoll> {
        let status = self.status(render_id).await?;
        Ok(match status.status {
            RenderState::Queued | RenderState::Rendering => RenderPoll::Pending,
            RenderState::Done => match status.output_url {
                Some(video_url) => RenderPoll::Done { video_url },
                None => {
                    return Err(StageError::RenderFailed(
                        "render finished without an output URL".to_string(),
                    ))
                }
            },
            RenderState::Failed => RenderPoll::Failed {
                reason: status
                    .error
                    .unwrap_or_else(|| "render farm reported failure".to_string()),
            },
        })
    }
}

/// Wire every stage to the external platform.
pub fn build_registry(
    content: ContentClient,
    render_farm: RenderFarmClient,
    jobs: Arc<dyn JobStore>,
    config: &WorkerConfig,
) -> Result<StageRegistry, ConfigError> {
    let mut executors: Vec<Arc<dyn StageExecutor>> = [
        Stage::Script,
        Stage::Images,
        Stage::Audio,
        Stage::Captions,
    ]
    .into_iter()
    .map(|stage| Arc::new(RemoteStage::new(stage, content.clone())) as Arc<dyn StageExecutor>)
    .collect();

    executors.push(Arc::new(RenderStage::new(
        Arc::new(render_farm),
        jobs,
        config.render_poll_interval,
        config.render_max_wait,
    )));

    StageRegistry::new(executors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelgen_services::ServiceConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_config(server: &MockServer) -> ServiceConfig {
        ServiceConfig {
            base_url: server.uri(),
            render_farm_url: server.uri(),
            timeout: Duration::from_secs(5),
            api_token: None,
        }
    }

    #[tokio::test]
    async fn test_full_registry_over_http() {
        let server = MockServer::start().await;
        for stage in ["script", "images", "audio", "captions"] {
            Mock::given(method("POST"))
                .and(path(format!("/jobs/job-1/stages/{}", stage)))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/jobs/job-1/captions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"text": "a", "start": 0.0, "end": 9.5}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/renders"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"renderId": "r-1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/renders/r-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "done",
                "outputUrl": "https://cdn.example.com/job-1.mp4"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/jobs/job-1/complete"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = service_config(&server);
        let content = ContentClient::new(config.clone()).unwrap();
        let farm = RenderFarmClient::new(config).unwrap();
        let jobs: Arc<dyn JobStore> = Arc::new(ContentJobStore::new(content.clone()));
        let worker_config = WorkerConfig {
            render_poll_interval: Duration::from_millis(5),
            ..WorkerConfig::default()
        };

        let registry = build_registry(content, farm, jobs, &worker_config).unwrap();
        let job_id = JobId::from_string("job-1");
        for stage in Stage::ALL {
            registry.get(stage).run(&job_id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_malformed_job_record_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/job-1/captions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let jobs = ContentJobStore::new(ContentClient::new(service_config(&server)).unwrap());
        let err = jobs
            .load_captions(&JobId::from_string("job-1"))
            .await
            .unwrap_err();
        assert!(!crate::classifier::is_retryable(&err));
    }

    #[tokio::test]
    async fn test_done_without_url_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/renders/r-2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "done"})),
            )
            .mount(&server)
            .await;

        let farm = RenderFarmClient::new(service_config(&server)).unwrap();
        let err = RenderFarm::poll(&farm, "r-2").await.unwrap_err();
        assert!(matches!(err, StageError::RenderFailed(_)));
    }
}

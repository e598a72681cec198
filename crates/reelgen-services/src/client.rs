//! Content platform HTTP client.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use reelgen_models::{Job, JobId, Stage};

use crate::error::{ServiceError, ServiceResult};
use crate::types::{CompleteJobRequest, FailJobRequest, HealthResponse};

/// Configuration for the service clients.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the content platform
    pub base_url: String,
    /// Base URL of the render farm
    pub render_farm_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            render_farm_url: "http://localhost:8090".to_string(),
            timeout: Duration::from_secs(120),
            api_token: None,
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("CONTENT_SERVICE_URL").unwrap_or(defaults.base_url),
            render_farm_url: std::env::var("RENDER_FARM_URL")
                .unwrap_or(defaults.render_farm_url),
            timeout: std::env::var("CONTENT_SERVICE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            api_token: std::env::var("CONTENT_SERVICE_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }

    pub(crate) fn build_http(&self) -> ServiceResult<Client> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ServiceError::Network)
    }
}

pub(crate) fn authorized(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

/// Turn a non-success response into [`ServiceError::Status`].
pub(crate) async fn check_status(service: &'static str, response: Response) -> ServiceResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        service,
        status,
        body,
    })
}

/// Read the body and decode it as JSON. A malformed body is a
/// [`ServiceError::Json`], never a network error.
pub(crate) async fn decode_json<T: DeserializeOwned>(response: Response) -> ServiceResult<T> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Client for the content platform.
///
/// Stage endpoints take only the job id; each stage reads its inputs from and
/// writes its outputs to the platform's durable job record.
#[derive(Clone)]
pub struct ContentClient {
    http: Client,
    config: ServiceConfig,
}

const SERVICE: &str = "content service";

impl ContentClient {
    pub fn new(config: ServiceConfig) -> ServiceResult<Self> {
        let http = config.build_http()?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ServiceResult<Self> {
        Self::new(ServiceConfig::from_env())
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        authorized(self.http.request(method, url), self.config.api_token.as_deref())
    }

    /// Check if the content platform is healthy.
    pub async fn health_check(&self) -> ServiceResult<bool> {
        match self.request(Method::GET, "/health").send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Content service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Content service health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Run one generation stage to completion.
    pub async fn run_stage(&self, job_id: &JobId, stage: Stage) -> ServiceResult<()> {
        let path = format!("/jobs/{}/stages/{}", job_id, stage);
        debug!(job_id = %job_id, stage = %stage, "Dispatching stage");

        let response = self.request(Method::POST, &path).send().await?;
        check_status(SERVICE, response).await?;
        Ok(())
    }

    /// Fetch the durable job record. `None` if the platform does not know it.
    pub async fn get_job(&self, job_id: &JobId) -> ServiceResult<Option<Job>> {
        let response = self
            .request(Method::GET, &format!("/jobs/{}", job_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(SERVICE, response).await?;
        Ok(Some(decode_json(response).await?))
    }

    /// Raw caption payload written by the captions stage.
    ///
    /// Accepts either a bare list or an object with a `captions` field.
    pub async fn get_captions(&self, job_id: &JobId) -> ServiceResult<Option<serde_json::Value>> {
        let response = self
            .request(Method::GET, &format!("/jobs/{}/captions", job_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(SERVICE, response).await?;
        let body: serde_json::Value = decode_json(response).await?;

        Ok(match body {
            serde_json::Value::Object(mut map) => map.remove("captions"),
            serde_json::Value::Null => None,
            other => Some(other),
        })
    }

    /// Record the final video URL and flip the job to complete.
    pub async fn complete_job(&self, job_id: &JobId, video_url: &str) -> ServiceResult<()> {
        let response = self
            .request(Method::POST, &format!("/jobs/{}/complete", job_id))
            .json(&CompleteJobRequest { video_url })
            .send()
            .await?;
        check_status(SERVICE, response).await?;
        Ok(())
    }

    /// Mark the job permanently failed.
    pub async fn fail_job(&self, job_id: &JobId, error: &str) -> ServiceResult<()> {
        let response = self
            .request(Method::POST, &format!("/jobs/{}/fail", job_id))
            .json(&FailJobRequest { error })
            .send()
            .await?;
        check_status(SERVICE, response).await?;
        Ok(())
    }
}

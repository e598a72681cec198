//! Cloud render farm client.

use reqwest::{Client, Method, RequestBuilder};
use tracing::debug;

use crate::client::{authorized, check_status, decode_json, ServiceConfig};
use crate::error::ServiceResult;
use crate::types::{RenderJobStatus, RenderRequest, RenderSubmission};

const SERVICE: &str = "render farm";

#[derive(Clone)]
pub struct RenderFarmClient {
    http: Client,
    config: ServiceConfig,
}

impl RenderFarmClient {
    pub fn new(config: ServiceConfig) -> ServiceResult<Self> {
        let http = config.build_http()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> ServiceResult<Self> {
        Self::new(ServiceConfig::from_env())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!(
            "{}{}",
            self.config.render_farm_url.trim_end_matches('/'),
            path
        );
        authorized(self.http.request(method, url), self.config.api_token.as_deref())
    }

    /// Submit a render. Returns the farm's render id.
    pub async fn submit(&self, request: &RenderRequest) -> ServiceResult<RenderSubmission> {
        debug!(
            job_id = %request.job_id,
            duration_secs = request.duration_secs,
            "Submitting render"
        );
        let response = self
            .request(Method::POST, "/renders")
            .json(request)
            .send()
            .await?;
        let response = check_status(SERVICE, response).await?;
        decode_json(response).await
    }

    /// Current state of a submitted render.
    pub async fn status(&self, render_id: &str) -> ServiceResult<RenderJobStatus> {
        let response = self
            .request(Method::GET, &format!("/renders/{}", render_id))
            .send()
            .await?;
        let response = check_status(SERVICE, response).await?;
        decode_json(response).await
    }
}

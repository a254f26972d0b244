//! Thin wrapper over the three ComfyUI endpoints a job needs.
//!
//! `POST /prompt` queues a workflow, `GET /history/{id}` reports whether
//! it finished, and `POST /queue` drops a prompt the worker gave up on.
//! Every request is bounded by [`REQUEST_TIMEOUT`], so a backend that
//! accepts a connection and never answers cannot stall a job.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

/// Upper bound on establishing a connection to ComfyUI.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on one request, including reading the body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoints of one ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub prompt_id: String,
    /// Queue position at submission time.
    #[serde(default)]
    pub number: Option<i64>,
}

/// Transport and protocol failures talking to ComfyUI.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Connection, timeout or body read failure.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI answered with a non-2xx status, e.g. 400 for a prompt that
    /// fails its node validation.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// A 2xx response whose body did not have the expected shape.
    #[error("Unexpected ComfyUI response body: {0}")]
    InvalidBody(String),
}

impl ComfyUIApi {
    /// Point at `api_url` (e.g. `http://127.0.0.1:8188`) with the default
    /// connect and request timeouts.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_timeouts(api_url, CONNECT_TIMEOUT, REQUEST_TIMEOUT)
    }

    /// Point at `api_url` with explicit timeouts.
    pub fn with_timeouts(api_url: impl Into<String>, connect: Duration, request: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .timeout(request)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to a default HTTP client");
                reqwest::Client::new()
            });
        Self::with_client(client, api_url)
    }

    /// Reuse an existing client; its timeouts apply as configured.
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Base URL without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Queue `workflow` under `client_id` and return the prompt id ComfyUI
    /// assigned to it.
    pub async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&json!({ "prompt": workflow, "client_id": client_id }))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Drop `prompt_id` from the queue (`{"delete": [prompt_id]}`).
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&json!({ "delete": [prompt_id] }))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    /// History record for `prompt_id`: a map keyed by prompt id that stays
    /// empty until the prompt has finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Turn a non-2xx response into [`ComfyUIApiError::ApiError`], keeping
    /// the body so validation errors reach the caller.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ComfyUIApiError::InvalidBody(e.to_string()))
    }
}

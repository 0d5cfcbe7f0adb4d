//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps image upload, workflow submission, history retrieval, output
//! download and queue deletion using [`reqwest`].

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::error::EngineError;
use crate::history::History;

const OP_UPLOAD: &str = "upload";
const OP_SUBMIT: &str = "submit";
const OP_HISTORY: &str = "history";
const OP_VIEW: &str = "view";
const OP_CANCEL: &str = "cancel";

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: String,
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8189`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Store an image in the engine's input folder.
    ///
    /// Sends a multipart `POST /upload/image` with the file in the `image`
    /// field. Returns the name the engine stored it under, which is
    /// `filename` unless the engine reports otherwise.
    pub async fn upload_image(&self, bytes: Vec<u8>, filename: &str) -> Result<String, EngineError> {
        let form = Form::new().part("image", Part::bytes(bytes).file_name(filename.to_string()));

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| EngineError::transport(OP_UPLOAD, e))?;

        let body = Self::success_text(OP_UPLOAD, response).await?;
        let stored = serde_json::from_str::<UploadResponse>(&body)
            .map(|r| r.name)
            .unwrap_or_else(|_| filename.to_string());

        Ok(stored)
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with body `{"prompt": <workflow>, "api": true}`.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, EngineError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "api": true,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::transport(OP_SUBMIT, e))?;

        Self::parse_response(OP_SUBMIT, response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. Node order of the
    /// `outputs` map is preserved as sent.
    pub async fn get_history(&self, prompt_id: &str) -> Result<History, EngineError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await
            .map_err(|e| EngineError::transport(OP_HISTORY, e))?;

        Self::parse_response(OP_HISTORY, response).await
    }

    /// Download a produced output file via `GET /view?filename=<name>`.
    pub async fn view(&self, filename: &str) -> Result<Vec<u8>, EngineError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[("filename", filename)])
            .send()
            .await
            .map_err(|e| EngineError::transport(OP_VIEW, e))?;

        let response = Self::ensure_success(OP_VIEW, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::transport(OP_VIEW, e))?;
        Ok(bytes.to_vec())
    }

    /// Remove a queued prompt.
    ///
    /// Sends a `POST /queue` request asking ComfyUI to delete the
    /// specified prompt from the queue. A prompt that already started is
    /// not stopped by this call.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), EngineError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::transport(OP_CANCEL, e))?;

        Self::ensure_success(OP_CANCEL, response).await?;
        Ok(())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`EngineError::Rejected`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(EngineError::Rejected {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn success_text(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<String, EngineError> {
        let response = Self::ensure_success(operation, response).await?;
        response
            .text()
            .await
            .map_err(|e| EngineError::transport(operation, e))
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<T, EngineError> {
        let body = Self::success_text(operation, response).await?;
        serde_json::from_str(&body).map_err(|e| {
            EngineError::Protocol(format!("Unexpected {operation} response: {e}"))
        })
    }
}

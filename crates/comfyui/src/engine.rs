//! The engine seam used by the orchestrator, and its ComfyUI backing.
//!
//! [`Engine`] exposes the five primitives one pose stage needs. The
//! ComfyUI implementation opens the event stream *before* posting the
//! workflow and parks it per job id, so the status broadcast that ends a
//! fast job cannot slip past before monitoring starts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::client::{ws_url_from_api, ComfyUIClient, EventStream};
use crate::error::EngineError;
use crate::history::select_output;
use crate::job::JobHandle;
use crate::monitor::await_terminal;
use crate::retry::{with_retry, RetryConfig};
use crate::workflow::WorkflowInstance;

/// Operations of a queue-based generation engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Store `bytes` under `filename`; returns the stored reference.
    async fn upload_image(&self, bytes: Vec<u8>, filename: &str) -> Result<String, EngineError>;

    /// Queue a workflow. The instance is consumed by the submission.
    async fn submit(&self, workflow: WorkflowInstance) -> Result<JobHandle, EngineError>;

    /// Wait for the job to finish, failing after `timeout`.
    async fn wait_for_completion(&self, job: &JobHandle, timeout: Duration) -> Result<(), EngineError>;

    /// Download the first output whose filename contains `prefix`.
    async fn fetch_output(&self, job: &JobHandle, prefix: &str) -> Result<Vec<u8>, EngineError>;

    /// Drop local resources held for a job that will not be awaited.
    async fn release(&self, _job: &JobHandle) {}

    /// Ask the engine to drop a queued job. Implies [`release`](Self::release).
    async fn cancel(&self, job: &JobHandle) -> Result<(), EngineError>;
}

/// Connection settings for one ComfyUI instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP base URL, e.g. `http://localhost:8189`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://localhost:8189`.
    pub ws_url: String,
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Settings with the WebSocket URL derived from `api_url`.
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        Self {
            ws_url: ws_url_from_api(&api_url),
            api_url,
            retry: RetryConfig::default(),
        }
    }
}

/// [`Engine`] backed by a ComfyUI server.
pub struct ComfyUIEngine {
    api: ComfyUIApi,
    client: ComfyUIClient,
    retry: RetryConfig,
    /// Event streams opened at submission, keyed by `prompt_id`.
    sessions: Mutex<HashMap<String, EventStream>>,
    /// Cancelled during shutdown; stops retries and monitoring.
    cancel: CancellationToken,
}

impl ComfyUIEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Share a caller-owned token so that cancelling a run also stops
    /// in-flight engine waits.
    pub fn with_cancellation(config: EngineConfig, cancel: CancellationToken) -> Self {
        Self {
            api: ComfyUIApi::new(config.api_url),
            client: ComfyUIClient::new(config.ws_url),
            retry: config.retry,
            sessions: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    /// Stop waits and retries and close every parked event stream.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down ComfyUI engine");
        self.cancel.cancel();

        let parked: Vec<_> = self.sessions.lock().await.drain().collect();
        for (job_id, mut stream) in parked {
            tracing::debug!(job_id = %job_id, "Closing parked event stream");
            let _ = stream.close(None).await;
        }
    }

    async fn subscribe(&self) -> Result<EventStream, EngineError> {
        with_retry(&self.retry, "subscribe", true, &self.cancel, || self.client.connect()).await
    }
}

#[async_trait]
impl Engine for ComfyUIEngine {
    async fn upload_image(&self, bytes: Vec<u8>, filename: &str) -> Result<String, EngineError> {
        // Only retried when the connection was never made.
        let stored = with_retry(&self.retry, "upload", false, &self.cancel, || {
            self.api.upload_image(bytes.clone(), filename)
        })
        .await?;

        tracing::info!(filename, stored = %stored, "Uploaded reference image");
        Ok(stored)
    }

    async fn submit(&self, workflow: WorkflowInstance) -> Result<JobHandle, EngineError> {
        let stream = self.subscribe().await?;
        let workflow = workflow.into_value();

        let response = with_retry(&self.retry, "submit", false, &self.cancel, || {
            self.api.submit_workflow(&workflow)
        })
        .await?;

        tracing::info!(
            job_id = %response.prompt_id,
            queue_number = ?response.number,
            "Workflow submitted to ComfyUI",
        );

        let job = JobHandle::new(response.prompt_id);
        self.sessions.lock().await.insert(job.job_id.clone(), stream);
        Ok(job)
    }

    async fn wait_for_completion(&self, job: &JobHandle, timeout: Duration) -> Result<(), EngineError> {
        let parked = self.sessions.lock().await.remove(&job.job_id);
        let mut stream = match parked {
            Some(stream) => stream,
            None => {
                tracing::warn!(
                    job_id = %job.job_id,
                    "No event stream opened at submission, subscribing late",
                );
                self.subscribe().await?
            }
        };

        let outcome = await_terminal(&mut stream, job, timeout, &self.cancel).await;
        let _ = stream.close(None).await;

        tracing::debug!(
            job_id = %job.job_id,
            state = ?outcome.state,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            protocol_errors = outcome.protocol_errors,
            "Job monitor finished",
        );
        outcome.into_result()
    }

    async fn fetch_output(&self, job: &JobHandle, prefix: &str) -> Result<Vec<u8>, EngineError> {
        let history = with_retry(&self.retry, "history", true, &self.cancel, || {
            self.api.get_history(&job.job_id)
        })
        .await?;

        let image = select_output(&history, &job.job_id, prefix)?;
        tracing::debug!(job_id = %job.job_id, filename = %image.filename, "Selected output");

        with_retry(&self.retry, "view", true, &self.cancel, || {
            self.api.view(&image.filename)
        })
        .await
    }

    async fn release(&self, job: &JobHandle) {
        let parked = self.sessions.lock().await.remove(&job.job_id);
        if let Some(mut stream) = parked {
            tracing::debug!(job_id = %job.job_id, "Closing parked event stream");
            let _ = stream.close(None).await;
        }
    }

    async fn cancel(&self, job: &JobHandle) -> Result<(), EngineError> {
        self.release(job).await;
        self.api.cancel_execution(&job.job_id).await?;
        tracing::info!(job_id = %job.job_id, "Removed job from ComfyUI queue");
        Ok(())
    }
}

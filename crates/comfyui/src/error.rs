//! Error type shared by every engine-facing operation.

use std::time::Duration;

use texture_core::error::ErrorKind;

use crate::workflow::WorkflowError;

/// Failure of a single engine interaction.
///
/// Every variant maps onto one [`ErrorKind`] via [`EngineError::kind`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Template or mapping problem. Not retryable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport failure. `request_sent` is `false` only when the
    /// connection was never established, so the engine cannot have seen
    /// the request.
    #[error("Connectivity error during {operation}: {detail}")]
    Connectivity {
        operation: &'static str,
        detail: String,
        request_sent: bool,
    },

    /// The engine answered with a non-success status.
    #[error("ComfyUI rejected {operation} ({status}): {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The engine reported an execution error for a queued job.
    #[error("Job {job_id} failed in the engine: {detail}")]
    JobFailed { job_id: String, detail: String },

    /// A response or event did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No terminal event arrived within the monitor bound. The job may
    /// still be queued or running engine-side.
    #[error("Timed out after {}s waiting for job {job_id}{detail}", .waited.as_secs())]
    Timeout {
        job_id: String,
        waited: Duration,
        detail: String,
    },

    /// The job's manifest has no qualifying output.
    #[error("No output for job {job_id}: {detail}")]
    ResultNotFound { job_id: String, detail: String },

    /// Waiting was stopped by a cancellation token.
    #[error("Operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Connectivity { .. } => ErrorKind::Connectivity,
            Self::Rejected { .. } | Self::JobFailed { .. } => ErrorKind::EngineRejected,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ResultNotFound { .. } => ErrorKind::ResultNotFound,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether repeating the operation is safe and may help.
    ///
    /// Connectivity failures always qualify for idempotent operations.
    /// For the rest only failures that never reached the engine do.
    pub fn is_retryable(&self, idempotent: bool) -> bool {
        match self {
            Self::Connectivity { request_sent, .. } => idempotent || !request_sent,
            _ => false,
        }
    }

    pub(crate) fn transport(operation: &'static str, err: reqwest::Error) -> Self {
        Self::Connectivity {
            operation,
            request_sent: !err.is_connect(),
            detail: err.to_string(),
        }
    }
}

impl From<WorkflowError> for EngineError {
    fn from(err: WorkflowError) -> Self {
        Self::Configuration(err.to_string())
    }
}

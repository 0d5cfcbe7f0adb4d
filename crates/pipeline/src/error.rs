use texture_core::error::{CoreError, ErrorKind};

use crate::assets::AssetError;

/// Failures that stop a run before any pose stage starts.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Pose assets unavailable: {0}")]
    Assets(#[from] AssetError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Configuration(_) | Self::Assets(_) => ErrorKind::Configuration,
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::Configuration(msg) => Self::Configuration(msg),
        }
    }
}

impl From<texture_comfyui::workflow::WorkflowError> for PipelineError {
    fn from(err: texture_comfyui::workflow::WorkflowError) -> Self {
        Self::Configuration(err.to_string())
    }
}

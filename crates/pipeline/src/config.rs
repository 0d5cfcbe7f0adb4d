use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use texture_comfyui::client::ws_url_from_api;
use texture_comfyui::retry::RetryConfig;
use texture_comfyui::workflow::NodeSlotMapping;
use texture_comfyui::EngineConfig;
use texture_core::error::CoreError;
use texture_core::poses::{PoseCatalog, DEFAULT_INITIAL_POSE};

use crate::orchestrator::{FailurePolicy, OrchestratorSettings};

/// Default HTTP base URL of the ComfyUI instance.
pub const DEFAULT_API_URL: &str = "http://localhost:8189";
/// Filename fragment identifying the background-removed output.
pub const DEFAULT_OUTPUT_PREFIX: &str = "no_bg";
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;

/// Pipeline configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local ComfyUI on port 8189.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    pub template_path: PathBuf,
    pub poses_dir: PathBuf,
    pub mapping: NodeSlotMapping,
    pub catalog: PoseCatalog,
    pub settings: OrchestratorSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid pose catalog: {0}")]
    Catalog(#[from] CoreError),
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                    |
    /// |--------------------------|----------------------------|
    /// | `COMFYUI_API_URL`        | `http://localhost:8189`    |
    /// | `COMFYUI_WS_URL`         | API URL with `ws` scheme   |
    /// | `WORKFLOW_TEMPLATE_PATH` | `resources/character.json` |
    /// | `POSES_DIR`              | `resources/poses`          |
    /// | `INITIAL_POSE`           | `pose1.jpg`                |
    /// | `OUTPUT_PREFIX`          | `no_bg`                    |
    /// | `JOB_TIMEOUT_SECS`       | `300`                      |
    /// | `CANCEL_ON_TIMEOUT`      | `true`                     |
    /// | `FAILURE_POLICY`         | `skip`                     |
    /// | `POSITIVE_PROMPT_NODE`   | `7`                        |
    /// | `NEGATIVE_PROMPT_NODE`   | `9`                        |
    /// | `REFERENCE_IMAGE_NODE`   | `10`                       |
    /// | `POSE_CATALOG`           | built-in catalog           |
    /// | `RETRY_MAX_ATTEMPTS`     | `3`                        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = var("COMFYUI_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let ws_url = var("COMFYUI_WS_URL").unwrap_or_else(|| ws_url_from_api(&api_url));

        let retry = RetryConfig {
            max_attempts: parse_or(&var, "RETRY_MAX_ATTEMPTS", RetryConfig::default().max_attempts)?,
            ..Default::default()
        };

        let defaults = NodeSlotMapping::default();
        let mapping = NodeSlotMapping {
            positive_prompt_node: var("POSITIVE_PROMPT_NODE").unwrap_or(defaults.positive_prompt_node),
            negative_prompt_node: var("NEGATIVE_PROMPT_NODE").unwrap_or(defaults.negative_prompt_node),
            reference_image_node: var("REFERENCE_IMAGE_NODE").unwrap_or(defaults.reference_image_node),
        };

        let catalog = match var("POSE_CATALOG") {
            Some(spec) => PoseCatalog::parse(&spec)?,
            None => PoseCatalog::default(),
        };

        let job_timeout_secs: u64 = parse_or(&var, "JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS)?;
        if job_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "JOB_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let settings = OrchestratorSettings {
            initial_pose: var("INITIAL_POSE").unwrap_or_else(|| DEFAULT_INITIAL_POSE.into()),
            output_prefix: var("OUTPUT_PREFIX").unwrap_or_else(|| DEFAULT_OUTPUT_PREFIX.into()),
            job_timeout: Duration::from_secs(job_timeout_secs),
            cancel_on_timeout: parse_or(&var, "CANCEL_ON_TIMEOUT", true)?,
            failure_policy: parse_or(&var, "FAILURE_POLICY", FailurePolicy::default())?,
        };

        Ok(Self {
            engine: EngineConfig {
                api_url,
                ws_url,
                retry,
            },
            template_path: var("WORKFLOW_TEMPLATE_PATH")
                .unwrap_or_else(|| "resources/character.json".into())
                .into(),
            poses_dir: var("POSES_DIR")
                .unwrap_or_else(|| "resources/poses".into())
                .into(),
            mapping,
            catalog,
            settings,
        })
    }
}

fn parse_or<T, V>(var: &V, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: key,
            reason: e.to_string(),
            value,
        }),
    }
}

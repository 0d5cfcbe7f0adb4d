//! Multi-pose generation run.
//!
//! [`PoseOrchestrator`] runs one stage per pose, strictly in sequence:
//! upload the reference asset, build the workflow, submit, wait for the
//! engine to finish, fetch the output. The initial pose always runs first
//! under [`INITIAL_POSE_LABEL`]; cataloged poses follow in filename order.
//!
//! Each stage yields a tagged result. What happens after a failed stage is
//! decided by the configured [`FailurePolicy`], never by an error
//! unwinding the run.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use texture_comfyui::workflow::{ParameterSet, WorkflowBuilder, WorkflowTemplate};
use texture_comfyui::{ComfyUIEngine, Engine, EngineError, JobHandle};
use texture_core::error::ErrorKind;
use texture_core::poses::{PoseCatalog, INITIAL_POSE_LABEL};
use texture_core::prompt::{self, PromptPair};

use crate::assets::{AssetStore, DirAssetStore};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::report::{GenerationReport, SkipReason, StageError};

/// What to do with the remaining poses once one stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run; later labels are reported as skipped.
    AbortRemaining,
    /// Record the error and move on to the next pose.
    #[default]
    SkipAndContinue,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "abort-remaining" | "abort_remaining" => Ok(Self::AbortRemaining),
            "skip" | "skip-and-continue" | "skip_and_continue" => Ok(Self::SkipAndContinue),
            other => Err(format!("unknown failure policy '{other}', expected abort or skip")),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbortRemaining => f.write_str("abort"),
            Self::SkipAndContinue => f.write_str("skip"),
        }
    }
}

/// Per-run knobs of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Asset used for the `initial_pose` stage.
    pub initial_pose: String,
    /// Fragment an output filename must contain to be returned.
    pub output_prefix: String,
    /// Upper bound on waiting for one job.
    pub job_timeout: Duration,
    /// Ask the engine to drop a job whose wait timed out.
    pub cancel_on_timeout: bool,
    pub failure_policy: FailurePolicy,
}

/// One pose to run.
#[derive(Debug, Clone)]
struct Stage {
    label: String,
    filename: String,
}

/// Sequential pose pipeline over an [`Engine`] and an [`AssetStore`].
pub struct PoseOrchestrator<E, A> {
    engine: Arc<E>,
    assets: Arc<A>,
    builder: WorkflowBuilder,
    catalog: Arc<PoseCatalog>,
    settings: OrchestratorSettings,
}

impl<E, A> PoseOrchestrator<E, A>
where
    E: Engine,
    A: AssetStore,
{
    pub fn new(
        engine: Arc<E>,
        assets: Arc<A>,
        builder: WorkflowBuilder,
        catalog: Arc<PoseCatalog>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            engine,
            assets,
            builder,
            catalog,
            settings,
        }
    }

    /// Generate the initial pose and every available cataloged pose.
    pub async fn run(&self, prompt: &str) -> Result<GenerationReport, PipelineError> {
        self.run_with_cancel(prompt, &CancellationToken::new()).await
    }

    /// [`run`](Self::run), stopping early once `cancel` fires.
    ///
    /// Returns `Err` only for problems detected before the first stage:
    /// an empty prompt or an unreadable asset store. Everything after
    /// that is reported per label in the [`GenerationReport`].
    pub async fn run_with_cancel(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerationReport, PipelineError> {
        let prompts = prompt::decorate(prompt)?;
        let available = self.assets.list().await?;
        let selection = self.catalog.select(&available);

        let mut report = GenerationReport::default();
        for missing in &selection.missing {
            tracing::warn!(
                label = %missing.label,
                filename = %missing.filename,
                "Pose asset not found, skipping",
            );
        }
        report.skip(
            selection.missing.iter().map(|e| e.label.as_str()),
            SkipReason::AssetMissing,
        );

        let stages: Vec<Stage> = std::iter::once(Stage {
            label: INITIAL_POSE_LABEL.to_string(),
            filename: self.settings.initial_pose.clone(),
        })
        .chain(selection.runnable.into_iter().map(|entry| Stage {
            label: entry.label,
            filename: entry.filename,
        }))
        .collect();

        tracing::info!(
            stages = stages.len(),
            policy = %self.settings.failure_policy,
            "Starting pose generation",
        );

        // Stored reference per local filename; each file is uploaded once per run.
        let mut uploaded: HashMap<String, String> = HashMap::new();

        for (index, stage) in stages.iter().enumerate() {
            let remaining = || stages[index + 1..].iter().map(|s| s.label.as_str());

            if cancel.is_cancelled() {
                report.skip(stages[index..].iter().map(|s| s.label.as_str()), SkipReason::Cancelled);
                break;
            }

            let span = tracing::info_span!("pose_stage", label = %stage.label, filename = %stage.filename);
            let outcome = self
                .run_stage(stage, &prompts, &mut uploaded, cancel)
                .instrument(span)
                .await;

            match outcome {
                Ok(bytes) => {
                    tracing::info!(label = %stage.label, bytes = bytes.len(), "Pose generated");
                    report.results.insert(stage.label.clone(), bytes);
                }
                Err(error) => {
                    tracing::error!(
                        label = %stage.label,
                        kind = %error.kind,
                        detail = %error.detail,
                        "Pose stage failed",
                    );
                    let cancelled = error.kind == ErrorKind::Cancelled;
                    report.errors.push(error);

                    if cancelled {
                        report.skip(remaining(), SkipReason::Cancelled);
                        break;
                    }
                    if self.settings.failure_policy == FailurePolicy::AbortRemaining {
                        report.skip(remaining(), SkipReason::Aborted);
                        break;
                    }
                }
            }
        }

        tracing::info!(
            generated = report.results.len(),
            failed = report.errors.len(),
            skipped = report.skipped.len(),
            "Pose generation finished",
        );
        Ok(report)
    }

    /// Upload, build, submit, wait, fetch for one pose.
    async fn run_stage(
        &self,
        stage: &Stage,
        prompts: &PromptPair,
        uploaded: &mut HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, StageError> {
        let failed = |kind: ErrorKind, detail: String, job: Option<&JobHandle>| StageError {
            label: stage.label.clone(),
            kind,
            detail,
            job_id: job.map(|j| j.job_id.clone()),
        };
        let engine_failed = |err: EngineError, job: Option<&JobHandle>| failed(err.kind(), err.to_string(), job);

        let reference = match uploaded.get(&stage.filename) {
            Some(stored) => stored.clone(),
            None => {
                let bytes = self
                    .assets
                    .read(&stage.filename)
                    .await
                    .map_err(|e| failed(ErrorKind::Configuration, e.to_string(), None))?;
                let stored = self
                    .engine
                    .upload_image(bytes, &stage.filename)
                    .await
                    .map_err(|e| engine_failed(e, None))?;
                uploaded.insert(stage.filename.clone(), stored.clone());
                stored
            }
        };

        let workflow = self
            .builder
            .build(&ParameterSet {
                positive_prompt: prompts.positive.clone(),
                negative_prompt: prompts.negative.clone(),
                reference_asset: reference,
            })
            .map_err(|e| failed(ErrorKind::Configuration, e.to_string(), None))?;

        if cancel.is_cancelled() {
            return Err(failed(ErrorKind::Cancelled, "run cancelled before submission".into(), None));
        }

        let job = self
            .engine
            .submit(workflow)
            .await
            .map_err(|e| engine_failed(e, None))?;

        let waited = tokio::select! {
            result = self.engine.wait_for_completion(&job, self.settings.job_timeout) => result,
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
        };

        if let Err(err) = waited {
            if matches!(err, EngineError::Timeout { .. } | EngineError::Cancelled) {
                self.release(&job).await;
            }
            return Err(engine_failed(err, Some(&job)));
        }

        self.engine
            .fetch_output(&job, &self.settings.output_prefix)
            .await
            .map_err(|e| engine_failed(e, Some(&job)))
    }

    /// Best-effort removal of an abandoned job from the engine queue.
    async fn release(&self, job: &JobHandle) {
        if !self.settings.cancel_on_timeout {
            self.engine.release(job).await;
            tracing::warn!(
                job_id = %job.job_id,
                "Abandoned job left in the engine queue",
            );
            return;
        }

        match self.engine.cancel(job).await {
            Ok(()) => tracing::info!(job_id = %job.job_id, "Cancelled abandoned job"),
            Err(e) => tracing::warn!(
                job_id = %job.job_id,
                error = %e,
                "Failed to cancel abandoned job, it may still run",
            ),
        }
    }
}

impl PoseOrchestrator<ComfyUIEngine, DirAssetStore> {
    /// Wire a ComfyUI-backed orchestrator from loaded configuration.
    ///
    /// Loads and validates the workflow template. `cancel` is shared with
    /// the engine so cancelling it also stops in-flight waits and retries.
    pub fn from_config(config: PipelineConfig, cancel: CancellationToken) -> Result<Self, PipelineError> {
        let template = WorkflowTemplate::load(&config.template_path)?;
        let builder = WorkflowBuilder::new(Arc::new(template), config.mapping)?;

        tracing::info!(
            api_url = %config.engine.api_url,
            template = %config.template_path.display(),
            poses_dir = %config.poses_dir.display(),
            poses = config.catalog.len(),
            "Pose orchestrator configured",
        );

        Ok(Self::new(
            Arc::new(ComfyUIEngine::with_cancellation(config.engine, cancel)),
            Arc::new(DirAssetStore::new(config.poses_dir)),
            builder,
            Arc::new(config.catalog),
            config.settings,
        ))
    }

    /// Stop in-flight engine work and close parked event streams.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

//! `texture-worker` -- generate a character pose set from one prompt.
//!
//! Loads pipeline configuration from the environment, runs every pose
//! through ComfyUI and writes `{label}.png` files plus a `report.json`
//! summary into the output directory.
//!
//! # Usage
//!
//! ```text
//! texture-worker "a knight in silver armor"
//! ```
//!
//! # Environment variables
//!
//! | Variable     | Required | Default  | Description                          |
//! |--------------|----------|----------|--------------------------------------|
//! | `PROMPT`     | no       | --       | Used when no prompt argument is given |
//! | `OUTPUT_DIR` | no       | `output` | Directory receiving images and report |
//!
//! Engine, template and pose settings are read by
//! [`PipelineConfig::from_env`].
//!
//! Exit status is `0` when every pose was generated, `2` when the run
//! finished with failed or skipped poses, and `1` when it could not run.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use texture_pipeline::{GenerationReport, PipelineConfig, PoseOrchestrator, SkippedPose, StageError};

const DEFAULT_OUTPUT_DIR: &str = "output";

/// Summary written next to the generated images.
#[derive(Serialize)]
struct RunSummary<'a> {
    prompt: &'a str,
    generated: Vec<&'a str>,
    errors: &'a [StageError],
    skipped: &'a [SkippedPose],
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "texture_worker=info,texture_pipeline=info,texture_comfyui=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prompt = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PROMPT").ok())
        .unwrap_or_else(|| {
            tracing::error!("A prompt is required, pass it as the first argument or set PROMPT");
            std::process::exit(1);
        });

    let output_dir: PathBuf = std::env::var("OUTPUT_DIR")
        .unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.into())
        .into();

    let config = PipelineConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let cancel = CancellationToken::new();
    let orchestrator = PoseOrchestrator::from_config(config, cancel.clone()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to set up pose orchestrator");
        std::process::exit(1);
    });

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let result = orchestrator.run_with_cancel(&prompt, &cancel).await;
    orchestrator.shutdown().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(kind = %e.kind(), error = %e, "Pose generation could not start");
            std::process::exit(1);
        }
    };

    if let Err(e) = write_outputs(&output_dir, &prompt, &report).await {
        tracing::error!(dir = %output_dir.display(), error = %e, "Failed to write outputs");
        std::process::exit(1);
    }

    for error in &report.errors {
        tracing::warn!(label = %error.label, kind = %error.kind, detail = %error.detail, "Pose failed");
    }
    for skipped in &report.skipped {
        tracing::warn!(label = %skipped.label, reason = ?skipped.reason, "Pose skipped");
    }

    tracing::info!(
        generated = report.results.len(),
        failed = report.errors.len(),
        skipped = report.skipped.len(),
        dir = %output_dir.display(),
        "Worker finished",
    );

    if !report.is_complete() {
        std::process::exit(2);
    }
}

async fn write_outputs(dir: &Path, prompt: &str, report: &GenerationReport) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    for (label, bytes) in report.results.iter() {
        let path = dir.join(format!("{label}.png"));
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), "Wrote pose image");
    }

    let summary = RunSummary {
        prompt,
        generated: report.results.labels().collect(),
        errors: &report.errors,
        skipped: &report.skipped,
    };
    let json = serde_json::to_vec_pretty(&summary).map_err(std::io::Error::other)?;
    tokio::fs::write(dir.join("report.json"), json).await
}

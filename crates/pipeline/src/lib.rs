//! Multi-pose character generation on top of ComfyUI.
//!
//! [`PoseOrchestrator`] turns one prompt into a set of labelled pose
//! images: an initial pose plus every cataloged pose whose reference
//! asset is available. Failures are attributed per label in the
//! returned [`GenerationReport`].

pub mod assets;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;

pub use assets::{AssetStore, DirAssetStore, MemoryAssetStore};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use orchestrator::{FailurePolicy, OrchestratorSettings, PoseOrchestrator};
pub use report::{GenerationReport, ResultSet, SkipReason, SkippedPose, StageError};

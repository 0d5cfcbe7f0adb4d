//! Typed `GET /history/{prompt_id}` manifest and output selection.
//!
//! The manifest maps a prompt id to its outputs, which map an output node
//! id to the images that node wrote:
//!
//! ```json
//! {"<prompt_id>": {"outputs": {"<node_id>": {"images": [{"filename": "no_bg_001.png"}]}}}}
//! ```

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::EngineError;

/// Whole history response, keyed by prompt id.
pub type History = IndexMap<String, HistoryEntry>;

/// History of one prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: IndexMap<String, NodeOutput>,
}

/// Everything one output node produced.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageDescriptor>,
}

/// A file written by an output node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// Pick the first image, across output nodes in manifest order, whose
/// filename contains `prefix`.
pub fn select_output<'a>(
    history: &'a History,
    job_id: &str,
    prefix: &str,
) -> Result<&'a ImageDescriptor, EngineError> {
    let entry = history.get(job_id).ok_or_else(|| EngineError::ResultNotFound {
        job_id: job_id.to_string(),
        detail: "no history entry for job".into(),
    })?;

    entry
        .outputs
        .values()
        .flat_map(|output| output.images.iter())
        .find(|image| image.filename.contains(prefix))
        .ok_or_else(|| {
            let produced: Vec<&str> = entry
                .outputs
                .values()
                .flat_map(|output| output.images.iter().map(|i| i.filename.as_str()))
                .collect();
            EngineError::ResultNotFound {
                job_id: job_id.to_string(),
                detail: format!("no output matching '{prefix}' among {produced:?}"),
            }
        })
}

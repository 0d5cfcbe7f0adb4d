//! Workflow templates and the copy-and-patch builder.
//!
//! A ComfyUI API-format workflow is a JSON object keyed by node id, each
//! node carrying an `inputs` object. [`WorkflowTemplate`] is loaded once
//! and never mutated; [`build`] returns a fresh [`WorkflowInstance`] with
//! only the three mapped slots overwritten.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Input field that receives prompt text on a text-encode node.
pub const TEXT_INPUT: &str = "text";
/// Input field that receives the uploaded filename on a load-image node.
pub const IMAGE_INPUT: &str = "image";

/// Which template nodes receive which parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeSlotMapping {
    pub positive_prompt_node: String,
    pub negative_prompt_node: String,
    pub reference_image_node: String,
}

impl Default for NodeSlotMapping {
    /// Node ids of the character workflow the pipeline was built around.
    fn default() -> Self {
        Self {
            positive_prompt_node: "7".into(),
            negative_prompt_node: "9".into(),
            reference_image_node: "10".into(),
        }
    }
}

impl NodeSlotMapping {
    fn slots(&self) -> [(&'static str, &str); 3] {
        [
            ("positive_prompt", self.positive_prompt_node.as_str()),
            ("negative_prompt", self.negative_prompt_node.as_str()),
            ("reference_image", self.reference_image_node.as_str()),
        ]
    }
}

/// Values written into one workflow copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    pub positive_prompt: String,
    pub negative_prompt: String,
    /// Filename of an asset already stored in the engine.
    pub reference_asset: String,
}

/// Errors raised while loading a template or patching a copy of it.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow template is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Workflow template must be a JSON object keyed by node id")]
    NotAnObject,

    #[error("Workflow template has no node '{node_id}' for slot {slot}")]
    MissingNode { slot: &'static str, node_id: String },

    #[error("Workflow node '{node_id}' has no inputs object")]
    MissingInputs { node_id: String },
}

/// Immutable, loaded workflow template.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTemplate {
    nodes: Map<String, Value>,
}

impl WorkflowTemplate {
    /// Read and parse a template file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let template = Self::from_json(&text)?;

        tracing::debug!(path = %path.display(), nodes = template.len(), "Loaded workflow template");
        Ok(template)
    }

    pub fn from_json(text: &str) -> Result<Self, WorkflowError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn from_value(value: Value) -> Result<Self, WorkflowError> {
        match value {
            Value::Object(nodes) => Ok(Self { nodes }),
            _ => Err(WorkflowError::NotAnObject),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&Value> {
        self.nodes.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check that every mapped node exists and has an `inputs` object.
    pub fn validate(&self, mapping: &NodeSlotMapping) -> Result<(), WorkflowError> {
        for (slot, node_id) in mapping.slots() {
            let node = self.nodes.get(node_id).ok_or_else(|| WorkflowError::MissingNode {
                slot,
                node_id: node_id.to_string(),
            })?;
            if !node.get("inputs").is_some_and(Value::is_object) {
                return Err(WorkflowError::MissingInputs {
                    node_id: node_id.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// One parameterized copy of a template, consumed by a single submission.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowInstance {
    nodes: Map<String, Value>,
}

impl WorkflowInstance {
    pub fn node(&self, node_id: &str) -> Option<&Value> {
        self.nodes.get(node_id)
    }

    /// The document posted as the `prompt` field of a job.
    pub fn into_value(self) -> Value {
        Value::Object(self.nodes)
    }
}

/// Produce a patched deep copy of `template`.
///
/// Only `inputs.text` of the two prompt nodes and `inputs.image` of the
/// reference node change; every other node is copied as-is.
pub fn build(
    template: &WorkflowTemplate,
    mapping: &NodeSlotMapping,
    params: &ParameterSet,
) -> Result<WorkflowInstance, WorkflowError> {
    template.validate(mapping)?;

    let mut nodes = template.nodes.clone();
    set_input(
        &mut nodes,
        &mapping.positive_prompt_node,
        TEXT_INPUT,
        &params.positive_prompt,
    )?;
    set_input(
        &mut nodes,
        &mapping.negative_prompt_node,
        TEXT_INPUT,
        &params.negative_prompt,
    )?;
    set_input(
        &mut nodes,
        &mapping.reference_image_node,
        IMAGE_INPUT,
        &params.reference_asset,
    )?;

    Ok(WorkflowInstance { nodes })
}

fn set_input(
    nodes: &mut Map<String, Value>,
    node_id: &str,
    field: &str,
    value: &str,
) -> Result<(), WorkflowError> {
    let inputs = nodes
        .get_mut(node_id)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| WorkflowError::MissingInputs {
            node_id: node_id.to_string(),
        })?;
    inputs.insert(field.to_string(), Value::String(value.to_string()));
    Ok(())
}

/// A template bound to its slot mapping, validated once up front.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    template: Arc<WorkflowTemplate>,
    mapping: NodeSlotMapping,
}

impl WorkflowBuilder {
    /// Fails if any mapped node is missing, so a bad deployment is caught
    /// before the first job is queued.
    pub fn new(template: Arc<WorkflowTemplate>, mapping: NodeSlotMapping) -> Result<Self, WorkflowError> {
        template.validate(&mapping)?;
        Ok(Self { template, mapping })
    }

    pub fn build(&self, params: &ParameterSet) -> Result<WorkflowInstance, WorkflowError> {
        build(&self.template, &self.mapping, params)
    }
}

//! What one orchestration run hands back to its caller.

use indexmap::IndexMap;
use serde::Serialize;
use texture_core::error::ErrorKind;

/// Generated images keyed by label, in the order their stages ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    images: IndexMap<String, Vec<u8>>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, bytes: Vec<u8>) {
        self.images.insert(label.into(), bytes);
    }

    pub fn get(&self, label: &str) -> Option<&[u8]> {
        self.images.get(label).map(Vec::as_slice)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.images.contains_key(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.images.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// A failed stage, attributed to exactly one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageError {
    pub label: String,
    pub kind: ErrorKind,
    pub detail: String,
    /// Engine job id, when the failure happened after submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Why a label has neither a result nor an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The cataloged reference asset was not available.
    AssetMissing,
    /// An earlier stage failed under the abort policy.
    Aborted,
    /// The run was cancelled before this stage started.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPose {
    pub label: String,
    pub reason: SkipReason,
}

/// Result of one run: every cataloged label appears in exactly one of
/// `results`, `errors` or `skipped`.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub results: ResultSet,
    pub errors: Vec<StageError>,
    pub skipped: Vec<SkippedPose>,
}

impl GenerationReport {
    /// True when every attempted and cataloged pose produced an image.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.skipped.is_empty()
    }

    pub fn error_for(&self, label: &str) -> Option<&StageError> {
        self.errors.iter().find(|e| e.label == label)
    }

    pub(crate) fn skip<'a>(&mut self, labels: impl IntoIterator<Item = &'a str>, reason: SkipReason) {
        self.skipped.extend(labels.into_iter().map(|label| SkippedPose {
            label: label.to_string(),
            reason,
        }));
    }
}

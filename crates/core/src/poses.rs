//! Pose catalog: which reference assets are run through the pipeline and
//! under which label their output is returned.

use std::collections::{BTreeMap, HashSet};

use crate::error::CoreError;

/// Result key reserved for the first stage of every run.
pub const INITIAL_POSE_LABEL: &str = "initial_pose";

/// Reference asset used for the initial stage when none is configured.
pub const DEFAULT_INITIAL_POSE: &str = "pose1.jpg";

/// Poses the character workflow is tuned for.
pub const DEFAULT_POSES: &[(&str, &str)] = &[
    ("pose2.jpg", "thinking"),
    ("pose7.jpg", "wrong"),
    ("pose8.jpg", "yay"),
];

/// Static mapping from pose asset filename to semantic label.
///
/// Backed by a `BTreeMap` so iteration is lexicographic by filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseCatalog {
    entries: BTreeMap<String, String>,
}

/// One catalog entry selected for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseEntry {
    pub filename: String,
    pub label: String,
}

/// Outcome of matching the catalog against the assets actually present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSelection {
    /// Entries with an asset on hand, in filename order.
    pub runnable: Vec<PoseEntry>,
    /// Entries whose asset was not found.
    pub missing: Vec<PoseEntry>,
}

impl PoseCatalog {
    /// Build a catalog, rejecting empty names, duplicate labels, and the
    /// reserved [`INITIAL_POSE_LABEL`].
    pub fn new<I, F, L>(entries: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (F, L)>,
        F: Into<String>,
        L: Into<String>,
    {
        let mut map = BTreeMap::new();
        let mut labels = HashSet::new();

        for (filename, label) in entries {
            let filename = filename.into().trim().to_string();
            let label = label.into().trim().to_string();

            if filename.is_empty() || label.is_empty() {
                return Err(CoreError::Configuration(
                    "Pose catalog entries need a filename and a label".into(),
                ));
            }
            if label == INITIAL_POSE_LABEL {
                return Err(CoreError::Configuration(format!(
                    "Pose label '{INITIAL_POSE_LABEL}' is reserved"
                )));
            }
            if !labels.insert(label.clone()) {
                return Err(CoreError::Configuration(format!(
                    "Duplicate pose label '{label}'"
                )));
            }
            if map.insert(filename.clone(), label).is_some() {
                return Err(CoreError::Configuration(format!(
                    "Duplicate pose file '{filename}'"
                )));
            }
        }

        Ok(Self { entries: map })
    }

    /// Parse the `file=label,file=label` form used in configuration.
    pub fn parse(spec: &str) -> Result<Self, CoreError> {
        let pairs = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|pair| {
                pair.split_once('=').ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "Invalid pose catalog entry '{pair}', expected file=label"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(pairs)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label for a pose file, if cataloged.
    pub fn label_for(&self, filename: &str) -> Option<&str> {
        self.entries.get(filename).map(String::as_str)
    }

    /// Iterate `(filename, label)` pairs in filename order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(f, l)| (f.as_str(), l.as_str()))
    }

    /// Match the catalog against the asset names that exist.
    ///
    /// Available names are sorted and filtered to cataloged files, so the
    /// result does not depend on the order of `available`. Cataloged files
    /// that are not available land in [`CatalogSelection::missing`].
    pub fn select<S: AsRef<str>>(&self, available: &[S]) -> CatalogSelection {
        let mut present: Vec<&str> = available
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| self.entries.contains_key(*name))
            .collect();
        present.sort_unstable();
        present.dedup();

        let runnable = present
            .iter()
            .map(|name| PoseEntry {
                filename: (*name).to_string(),
                label: self.entries[*name].clone(),
            })
            .collect();

        let missing = self
            .iter()
            .filter(|(filename, _)| !present.contains(filename))
            .map(|(filename, label)| PoseEntry {
                filename: filename.to_string(),
                label: label.to_string(),
            })
            .collect();

        CatalogSelection { runnable, missing }
    }
}

impl Default for PoseCatalog {
    fn default() -> Self {
        Self {
            entries: DEFAULT_POSES
                .iter()
                .map(|(f, l)| (f.to_string(), l.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_contents() {
        let catalog = PoseCatalog::default();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.label_for("pose2.jpg"), Some("thinking"));
        assert_eq!(catalog.label_for("pose7.jpg"), Some("wrong"));
        assert_eq!(catalog.label_for("pose8.jpg"), Some("yay"));
        assert_eq!(catalog.label_for("pose1.jpg"), None);
    }

    #[test]
    fn select_sorts_and_filters() {
        let catalog = PoseCatalog::new([("pose8.jpg", "yay"), ("pose2.jpg", "thinking")]).unwrap();
        let available = ["pose8.jpg", "pose1.jpg", "notes.txt", "pose2.jpg"];

        let selection = catalog.select(&available);
        let labels: Vec<_> = selection.runnable.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["thinking", "yay"]);
        assert!(selection.missing.is_empty());
    }

    #[test]
    fn select_reports_missing_assets() {
        let catalog = PoseCatalog::default();
        let selection = catalog.select(&["pose2.jpg"]);
        assert_eq!(selection.runnable.len(), 1);
        let missing: Vec<_> = selection.missing.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(missing, vec!["wrong", "yay"]);
    }

    #[test]
    fn parse_config_form() {
        let catalog = PoseCatalog::parse("pose2.jpg=thinking, pose8.jpg=yay,").unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.label_for("pose8.jpg"), Some("yay"));
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(PoseCatalog::parse("pose2.jpg").is_err());
    }

    #[test]
    fn reserved_label_rejected() {
        assert!(PoseCatalog::new([("a.jpg", INITIAL_POSE_LABEL)]).is_err());
    }

    #[test]
    fn duplicate_label_rejected() {
        assert!(PoseCatalog::new([("a.jpg", "x"), ("b.jpg", "x")]).is_err());
    }
}

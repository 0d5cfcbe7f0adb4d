//! Local pose reference assets.
//!
//! The orchestrator reads reference images through [`AssetStore`] so runs
//! can be driven from a directory on disk or from bytes supplied by a
//! caller.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Failed to list assets in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read asset {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Asset {0} not found")]
    NotFound(String),
}

/// Source of pose reference images.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Names of every available asset, in no particular order.
    async fn list(&self) -> Result<Vec<String>, AssetError>;

    async fn read(&self, name: &str) -> Result<Vec<u8>, AssetError>;
}

/// Assets stored as files in one directory.
#[derive(Debug, Clone)]
pub struct DirAssetStore {
    root: PathBuf,
}

impl DirAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetStore for DirAssetStore {
    async fn list(&self) -> Result<Vec<String>, AssetError> {
        let list_err = |source| AssetError::List {
            path: self.root.clone(),
            source,
        };

        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(list_err)?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(list_err)? {
            if entry.file_type().await.map_err(list_err)?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, AssetError> {
        // Names come from configuration; keep reads inside the root.
        if name.contains(['/', '\\']) || name == ".." {
            return Err(AssetError::NotFound(name.to_string()));
        }

        tokio::fs::read(self.root.join(name))
            .await
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => AssetError::NotFound(name.to_string()),
                _ => AssetError::Read {
                    name: name.to_string(),
                    source,
                },
            })
    }
}

/// Assets held in memory, e.g. images posted by a caller.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetStore {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), bytes.into());
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn list(&self) -> Result<Vec<String>, AssetError> {
        Ok(self.files.keys().cloned().collect())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, AssetError> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(name.to_string()))
    }
}

//! Artifact store
//!
//! Workers cache expensive outputs (rendered clips, edit results) here so a
//! repeated request does not hit the tool again. The store is keyed by a
//! content-derived identifier and lives outside session state.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::NodeError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("artifact storage failed: {0}")]
    Storage(String),

    #[error("artifact {key} is corrupt: {message}")]
    Corrupt { key: String, message: String },
}

impl From<ArtifactError> for NodeError {
    fn from(err: ArtifactError) -> Self {
        NodeError::external(err.to_string())
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, ArtifactError>;

    async fn put(&self, key: &str, value: &Value) -> Result<(), ArtifactError>;

    async fn contains(&self, key: &str) -> Result<bool, ArtifactError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<String, Value>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, ArtifactError> {
        Ok(self.artifacts.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &Value) -> Result<(), ArtifactError> {
        self.artifacts
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, ArtifactError> {
        Ok(self.artifacts.read().await.contains_key(key))
    }
}

/// One JSON file per artifact, named by the SHA-256 of its key.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root.join(format!("{digest:x}.json"))
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, ArtifactError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ArtifactError::Storage(format!("{}: {e}", path.display()))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ArtifactError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    async fn put(&self, key: &str, value: &Value) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ArtifactError::Storage(e.to_string()))?;
        let data = serde_json::to_vec(value).map_err(|e| ArtifactError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let path = self.path_for(key);
        let temp = path.with_extension("tmp");
        fs::write(&temp, &data)
            .await
            .map_err(|e| ArtifactError::Storage(e.to_string()))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| ArtifactError::Storage(e.to_string()))
    }

    async fn contains(&self, key: &str) -> Result<bool, ArtifactError> {
        Ok(fs::try_exists(self.path_for(key)).await.unwrap_or(false))
    }
}

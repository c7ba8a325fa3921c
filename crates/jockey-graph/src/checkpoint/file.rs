//! File-based Checkpointer Implementation
//!
//! Stores checkpoints as JSON files, one directory per session.
//! Supports optional compression via zstd for reduced storage.
//!
//! # Directory Structure
//!
//! ```text
//! checkpoints/
//! └── {session_id}/
//!     ├── checkpoint_00001.json[.zst]
//!     ├── checkpoint_00002.json[.zst]
//!     └── checkpoint_00003.json[.zst]
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{decode, encode, Checkpoint, Checkpointer};
use crate::error::CheckpointError;
use crate::state::WorkflowState;
use crate::workflow::NodeKey;

/// File-based checkpointer that stores checkpoints as JSON files.
///
/// Atomic writes are ensured via temporary file + rename pattern.
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    base_path: PathBuf,
    /// Whether to compress checkpoints with zstd
    compression: bool,
}

impl FileCheckpointer {
    /// Create a new file-based checkpointer rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>, compression: bool) -> Self {
        Self {
            base_path: base_path.into(),
            compression,
        }
    }

    /// Directory holding one session's checkpoints
    fn session_path(&self, session_id: &str) -> Result<PathBuf, CheckpointError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CheckpointError::storage(format!(
                "session id {session_id:?} cannot be used as a directory name"
            )));
        }
        Ok(self.base_path.join(session_id))
    }

    fn checkpoint_path(&self, session_id: &str, step: usize) -> Result<PathBuf, CheckpointError> {
        let filename = if self.compression {
            format!("checkpoint_{:05}.json.zst", step)
        } else {
            format!("checkpoint_{:05}.json", step)
        };
        Ok(self.session_path(session_id)?.join(filename))
    }

    fn temp_path(&self, session_id: &str, step: usize) -> Result<PathBuf, CheckpointError> {
        Ok(self
            .session_path(session_id)?
            .join(format!("checkpoint_{:05}.tmp", step)))
    }

    /// Parse the step number from a finished checkpoint filename.
    /// Temporary files are ignored.
    fn parse_step(path: &Path) -> Option<usize> {
        let filename = path.file_name()?.to_str()?;
        let rest = filename.strip_prefix("checkpoint_")?;
        let (number, extension) = rest.split_once('.')?;
        if extension != "json" && extension != "json.zst" {
            return None;
        }
        number.parse().ok()
    }

    async fn list_steps(&self, session_id: &str) -> Result<Vec<usize>, CheckpointError> {
        let dir = self.session_path(session_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to read directory: {}", e)))?;

        let mut steps = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to read entry: {}", e)))?
        {
            if let Some(step) = Self::parse_step(&entry.path()) {
                steps.push(step);
            }
        }

        steps.sort_unstable();
        Ok(steps)
    }
}

#[async_trait]
impl<S, K> Checkpointer<S, K> for FileCheckpointer
where
    S: WorkflowState,
    K: NodeKey,
{
    async fn put(&self, checkpoint: &Checkpoint<S, K>) -> Result<(), CheckpointError> {
        let dir = self.session_path(&checkpoint.session_id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to create directory: {}", e)))?;

        let data = encode(checkpoint, self.compression)?;

        // Write to temp file first (atomic write pattern)
        let temp_path = self.temp_path(&checkpoint.session_id, checkpoint.step)?;
        let final_path = self.checkpoint_path(&checkpoint.session_id, checkpoint.step)?;

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to create temp file: {}", e)))?;
        file.write_all(&data)
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to write data: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to sync file: {}", e)))?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to rename file: {}", e)))?;

        Ok(())
    }

    async fn get(
        &self,
        session_id: &str,
        step: usize,
    ) -> Result<Option<Checkpoint<S, K>>, CheckpointError> {
        let path = self.checkpoint_path(session_id, step)?;
        if !path.exists() {
            return Ok(None);
        }

        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to open file: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to read file: {}", e)))?;

        let checkpoint: Checkpoint<S, K> = decode(&data, self.compression)?;
        if checkpoint.session_id != session_id {
            return Err(CheckpointError::SessionMismatch {
                expected: session_id.to_string(),
                found: checkpoint.session_id,
            });
        }

        Ok(Some(checkpoint))
    }

    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint<S, K>>, CheckpointError> {
        match self.list_steps(session_id).await?.last() {
            Some(&step) => self.get(session_id, step).await,
            None => Ok(None),
        }
    }

    async fn list(&self, session_id: &str) -> Result<Vec<usize>, CheckpointError> {
        self.list_steps(session_id).await
    }

    async fn delete(&self, session_id: &str, step: usize) -> Result<(), CheckpointError> {
        let path = self.checkpoint_path(session_id, step)?;
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| CheckpointError::storage(format!("Failed to delete file: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::SessionStatus;
    use crate::testing::{Step, TraceState, TraceUpdate};
    use tempfile::tempdir;

    type TraceCheckpoint = Checkpoint<TraceState, Step>;
    type Store = dyn Checkpointer<TraceState, Step>;

    fn checkpoint(session: &str, step: usize) -> TraceCheckpoint {
        let state = TraceState::default()
            .apply_update(TraceUpdate::visit("a").route("b"))
            .unwrap();
        Checkpoint::new(session, step, state, Some(Step::B), SessionStatus::InProgress)
    }

    #[tokio::test]
    async fn test_file_checkpointer_put_get() {
        let temp_dir = tempdir().unwrap();
        let store: &Store = &FileCheckpointer::new(temp_dir.path(), false);

        store.put(&checkpoint("session-1", 5)).await.unwrap();
        let loaded = store.get("session-1", 5).await.unwrap().unwrap();

        assert_eq!(loaded.step, 5);
        assert_eq!(loaded.pending, Some(Step::B));
        assert_eq!(loaded.state.visited, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_file_checkpointer_with_compression() {
        let temp_dir = tempdir().unwrap();
        let store: &Store = &FileCheckpointer::new(temp_dir.path(), true);

        store.put(&checkpoint("zipped", 10)).await.unwrap();

        let path = temp_dir.path().join("zipped/checkpoint_00010.json.zst");
        assert!(path.exists());

        let loaded = store.get("zipped", 10).await.unwrap().unwrap();
        assert_eq!(loaded.state.route.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_file_checkpointer_get_nonexistent() {
        let temp_dir = tempdir().unwrap();
        let store: &Store = &FileCheckpointer::new(temp_dir.path(), false);

        assert!(store.get("session-1", 999).await.unwrap().is_none());
        assert!(store.latest("never-written").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_checkpointer_sessions_are_isolated() {
        let temp_dir = tempdir().unwrap();
        let store: &Store = &FileCheckpointer::new(temp_dir.path(), false);

        for step in [5, 1, 10] {
            store.put(&checkpoint("left", step)).await.unwrap();
        }
        store.put(&checkpoint("right", 2)).await.unwrap();

        assert_eq!(store.list("left").await.unwrap(), vec![1, 5, 10]);
        assert_eq!(store.latest("left").await.unwrap().unwrap().step, 10);
        assert_eq!(store.list("right").await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_file_checkpointer_delete_and_prune() {
        let temp_dir = tempdir().unwrap();
        let store: &Store = &FileCheckpointer::new(temp_dir.path(), false);

        for step in 1..=5 {
            store.put(&checkpoint("s", step)).await.unwrap();
        }

        store.delete("s", 5).await.unwrap();
        assert!(store.get("s", 5).await.unwrap().is_none());

        let deleted = store.prune("s", 2).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.list("s").await.unwrap(), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_file_checkpointer_atomic_write() {
        let temp_dir = tempdir().unwrap();
        let store: &Store = &FileCheckpointer::new(temp_dir.path(), false);

        store.put(&checkpoint("s", 7)).await.unwrap();

        assert!(!temp_dir.path().join("s/checkpoint_00007.tmp").exists());
        assert!(temp_dir.path().join("s/checkpoint_00007.json").exists());
    }

    #[tokio::test]
    async fn test_file_checkpointer_rejects_path_like_session_ids() {
        let temp_dir = tempdir().unwrap();
        let store: &Store = &FileCheckpointer::new(temp_dir.path(), false);

        let err = store.put(&checkpoint("../escape", 1)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Storage(_)));
    }

    #[tokio::test]
    async fn test_file_checkpointer_detects_foreign_checkpoint() {
        let temp_dir = tempdir().unwrap();
        let store: &Store = &FileCheckpointer::new(temp_dir.path(), false);

        store.put(&checkpoint("original", 1)).await.unwrap();
        std::fs::create_dir_all(temp_dir.path().join("copy")).unwrap();
        std::fs::copy(
            temp_dir.path().join("original/checkpoint_00001.json"),
            temp_dir.path().join("copy/checkpoint_00001.json"),
        )
        .unwrap();

        let err = store.get("copy", 1).await.unwrap_err();
        assert!(matches!(err, CheckpointError::SessionMismatch { .. }));
    }

    #[test]
    fn test_parse_step() {
        assert_eq!(FileCheckpointer::parse_step(Path::new("checkpoint_00005.json")), Some(5));
        assert_eq!(
            FileCheckpointer::parse_step(Path::new("checkpoint_00123.json.zst")),
            Some(123)
        );
        assert_eq!(FileCheckpointer::parse_step(Path::new("checkpoint_00007.tmp")), None);
        assert_eq!(FileCheckpointer::parse_step(Path::new("other_file.json")), None);
    }
}

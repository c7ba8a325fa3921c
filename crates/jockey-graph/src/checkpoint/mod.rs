//! Checkpoint store
//!
//! A checkpoint is written after every merged node update, so a crash loses
//! at most the node that was executing. Each record carries the full session
//! state plus the node that is pending next; resuming means reading the
//! latest record and continuing from that node.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Checkpointer                  │
//! │   ┌──────────┐  ┌──────────┐  ┌──────────┐  │
//! │   │  Memory  │  │   File   │  │  SQLite  │  │
//! │   └──────────┘  └──────────┘  └──────────┘  │
//! │          └────────────┼────────────┘         │
//! │                       ▼                      │
//! │      Checkpoint<S, K> keyed by session id    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Writes for one session are ordered by the session registry, which allows
//! a single in-flight run per session id. Backends only need to be safe for
//! concurrent access across different sessions.

mod file;
#[cfg(feature = "checkpointer-sqlite")]
mod sqlite;

pub use file::FileCheckpointer;
#[cfg(feature = "checkpointer-sqlite")]
pub use sqlite::SqliteCheckpointer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::CheckpointError;
use crate::state::WorkflowState;
use crate::workflow::NodeKey;

/// Lifecycle of a session as recorded in its latest checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No node pending; the next run starts at the entry node.
    #[default]
    Idle,
    /// A node is pending (also after a failure or cancellation).
    InProgress,
    /// Waiting at an interrupt gate for external input.
    Paused,
    /// Explicitly closed; no further runs are accepted.
    Closed,
}

impl SessionStatus {
    /// Idle and closed sessions have nothing left to resume.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Idle | SessionStatus::Closed)
    }
}

/// A persisted snapshot of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S, K> {
    pub session_id: String,

    /// Monotonic per-session sequence number
    pub step: usize,

    pub state: S,

    /// Node to run next, `None` once the graph reached its terminal
    pub pending: Option<K>,

    pub status: SessionStatus,

    pub timestamp: DateTime<Utc>,

    /// Optional metadata for debugging or external tools
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl<S, K> Checkpoint<S, K> {
    pub fn new(
        session_id: impl Into<String>,
        step: usize,
        state: S,
        pending: Option<K>,
        status: SessionStatus,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            step,
            state,
            pending,
            status,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to this checkpoint
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Durable storage for checkpoints, keyed by session id.
#[async_trait]
pub trait Checkpointer<S, K>: Send + Sync
where
    S: WorkflowState,
    K: NodeKey,
{
    /// Persist a checkpoint. Implementations must write atomically.
    async fn put(&self, checkpoint: &Checkpoint<S, K>) -> Result<(), CheckpointError>;

    /// Load a specific step of a session.
    async fn get(&self, session_id: &str, step: usize)
        -> Result<Option<Checkpoint<S, K>>, CheckpointError>;

    /// Load the most recent checkpoint of a session.
    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint<S, K>>, CheckpointError>;

    /// Steps stored for a session, sorted ascending.
    async fn list(&self, session_id: &str) -> Result<Vec<usize>, CheckpointError>;

    /// Delete one step of a session.
    async fn delete(&self, session_id: &str, step: usize) -> Result<(), CheckpointError>;

    /// Keep only the most recent `keep` checkpoints of a session.
    async fn prune(&self, session_id: &str, keep: usize) -> Result<usize, CheckpointError> {
        let steps = self.list(session_id).await?;
        let to_delete = steps.len().saturating_sub(keep);
        for step in steps.iter().take(to_delete) {
            self.delete(session_id, *step).await?;
        }
        Ok(to_delete)
    }

    /// Remove every checkpoint of a session.
    async fn clear(&self, session_id: &str) -> Result<(), CheckpointError> {
        for step in self.list(session_id).await? {
            self.delete(session_id, step).await?;
        }
        Ok(())
    }
}

/// Configuration for creating checkpointers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CheckpointerConfig {
    /// In-memory checkpointing (not durable across restarts)
    #[default]
    Memory,

    /// File-based checkpointing
    File {
        /// Directory to store checkpoint files
        path: PathBuf,
        /// Whether to compress checkpoint data (uses zstd)
        compression: bool,
    },

    /// SQLite-based checkpointing (requires `checkpointer-sqlite` feature)
    #[cfg(feature = "checkpointer-sqlite")]
    Sqlite {
        /// Path to the SQLite database file, or `:memory:` for in-memory
        path: String,
    },
}

/// In-memory checkpointer.
#[derive(Debug)]
pub struct MemoryCheckpointer<S, K> {
    sessions: tokio::sync::RwLock<HashMap<String, BTreeMap<usize, Checkpoint<S, K>>>>,
}

impl<S, K> Default for MemoryCheckpointer<S, K> {
    fn default() -> Self {
        Self {
            sessions: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl<S, K> MemoryCheckpointer<S, K> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<S, K> Checkpointer<S, K> for MemoryCheckpointer<S, K>
where
    S: WorkflowState,
    K: NodeKey,
{
    async fn put(&self, checkpoint: &Checkpoint<S, K>) -> Result<(), CheckpointError> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(checkpoint.session_id.clone())
            .or_default()
            .insert(checkpoint.step, checkpoint.clone());
        Ok(())
    }

    async fn get(
        &self,
        session_id: &str,
        step: usize,
    ) -> Result<Option<Checkpoint<S, K>>, CheckpointError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).and_then(|steps| steps.get(&step)).cloned())
    }

    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint<S, K>>, CheckpointError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .and_then(|steps| steps.values().next_back())
            .cloned())
    }

    async fn list(&self, session_id: &str) -> Result<Vec<usize>, CheckpointError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|steps| steps.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, session_id: &str, step: usize) -> Result<(), CheckpointError> {
        let mut sessions = self.sessions.write().await;
        if let Some(steps) = sessions.get_mut(session_id) {
            steps.remove(&step);
            if steps.is_empty() {
                sessions.remove(session_id);
            }
        }
        Ok(())
    }
}

/// Serialize a checkpoint, compressing with zstd when requested.
fn encode<T: Serialize>(value: &T, compression: bool) -> Result<Vec<u8>, CheckpointError> {
    let json =
        serde_json::to_vec_pretty(value).map_err(|e| CheckpointError::serialization(e.to_string()))?;
    if !compression {
        return Ok(json);
    }
    let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3)
        .map_err(|e| CheckpointError::storage(format!("Compression init failed: {}", e)))?;
    encoder
        .write_all(&json)
        .map_err(|e| CheckpointError::storage(format!("Compression write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| CheckpointError::storage(format!("Compression finish failed: {}", e)))
}

fn decode<T: DeserializeOwned>(data: &[u8], compression: bool) -> Result<T, CheckpointError> {
    let json = if compression {
        zstd::stream::decode_all(data)
            .map_err(|e| CheckpointError::storage(format!("Decompression failed: {}", e)))?
    } else {
        data.to_vec()
    };
    serde_json::from_slice(&json).map_err(|e| CheckpointError::serialization(e.to_string()))
}

/// Create a checkpointer from configuration.
pub async fn create_checkpointer<S, K>(
    config: CheckpointerConfig,
) -> Result<Arc<dyn Checkpointer<S, K>>, CheckpointError>
where
    S: WorkflowState,
    K: NodeKey,
{
    match config {
        CheckpointerConfig::Memory => Ok(Arc::new(MemoryCheckpointer::<S, K>::new())),

        CheckpointerConfig::File { path, compression } => {
            Ok(Arc::new(FileCheckpointer::new(path, compression)))
        }

        #[cfg(feature = "checkpointer-sqlite")]
        CheckpointerConfig::Sqlite { path } => Ok(Arc::new(SqliteCheckpointer::new(&path).await?)),
    }
}

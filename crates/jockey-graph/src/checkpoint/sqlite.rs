//! SQLite-based Checkpointer Implementation
//!
//! One table holds every session; rows are unique per `(session_id, step)`.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS checkpoints (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     session_id TEXT NOT NULL,
//!     step INTEGER NOT NULL,
//!     data BLOB NOT NULL,
//!     created_at TEXT NOT NULL,
//!     UNIQUE(session_id, step)
//! );
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let checkpointer = SqliteCheckpointer::new("./sessions.db").await?;
//! let scratch = SqliteCheckpointer::new(":memory:").await?;
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tokio_rusqlite::Connection;

use super::{decode, encode, Checkpoint, Checkpointer};
use crate::error::CheckpointError;
use crate::state::WorkflowState;
use crate::workflow::NodeKey;

/// SQLite-based checkpointer for durable session persistence.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointer {
    conn: Arc<Connection>,
    compression: bool,
}

impl SqliteCheckpointer {
    /// Open (or create) the database at `path`. `:memory:` is accepted.
    pub async fn new(path: impl AsRef<str>) -> Result<Self, CheckpointError> {
        Self::with_compression(path, false).await
    }

    /// Open the database, storing checkpoint blobs zstd-compressed.
    pub async fn with_compression(
        path: impl AsRef<str>,
        compression: bool,
    ) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_string();
        let conn = Connection::open(&path)
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to open SQLite: {}", e)))?;

        conn.call(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS checkpoints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    step INTEGER NOT NULL,
                    data BLOB NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE(session_id, step)
                );
                CREATE INDEX IF NOT EXISTS idx_session_step
                    ON checkpoints(session_id, step);
                "#,
            )?;
            Ok(())
        })
        .await
        .map_err(|e| CheckpointError::storage(format!("Failed to create schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(conn),
            compression,
        })
    }

    async fn max_step(&self, session_id: &str) -> Result<Option<usize>, CheckpointError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| {
                let step: Option<i64> = conn.query_row(
                    "SELECT MAX(step) FROM checkpoints WHERE session_id = ?1",
                    rusqlite::params![session_id],
                    |row| row.get(0),
                )?;
                Ok(step.map(|s| s as usize))
            })
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to query latest step: {}", e)))
    }
}

#[async_trait]
impl<S, K> Checkpointer<S, K> for SqliteCheckpointer
where
    S: WorkflowState,
    K: NodeKey,
{
    async fn put(&self, checkpoint: &Checkpoint<S, K>) -> Result<(), CheckpointError> {
        let data = encode(checkpoint, self.compression)?;
        let session_id = checkpoint.session_id.clone();
        let step = checkpoint.step as i64;
        let created_at = checkpoint.timestamp.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO checkpoints (session_id, step, data, created_at)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    rusqlite::params![session_id, step, data, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to save checkpoint: {}", e)))
    }

    async fn get(
        &self,
        session_id: &str,
        step: usize,
    ) -> Result<Option<Checkpoint<S, K>>, CheckpointError> {
        let key = session_id.to_string();
        let data = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT data FROM checkpoints WHERE session_id = ?1 AND step = ?2")?;
                let mut rows = stmt.query(rusqlite::params![key, step as i64])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row.get::<_, Vec<u8>>(0)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to load checkpoint: {}", e)))?;

        let Some(data) = data else {
            return Ok(None);
        };
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
        match self.max_step(session_id).await? {
            Some(step) => self.get(session_id, step).await,
            None => Ok(None),
        }
    }

    async fn list(&self, session_id: &str) -> Result<Vec<usize>, CheckpointError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT step FROM checkpoints WHERE session_id = ?1 ORDER BY step ASC",
                )?;
                let rows = stmt.query_map(rusqlite::params![session_id], |row| {
                    let step: i64 = row.get(0)?;
                    Ok(step as usize)
                })?;
                let mut steps = Vec::new();
                for row in rows {
                    steps.push(row?);
                }
                Ok(steps)
            })
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to list checkpoints: {}", e)))
    }

    async fn delete(&self, session_id: &str, step: usize) -> Result<(), CheckpointError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM checkpoints WHERE session_id = ?1 AND step = ?2",
                    rusqlite::params![session_id, step as i64],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to delete checkpoint: {}", e)))
    }

    async fn clear(&self, session_id: &str) -> Result<(), CheckpointError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM checkpoints WHERE session_id = ?1",
                    rusqlite::params![session_id],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CheckpointError::storage(format!("Failed to clear session: {}", e)))
    }
}

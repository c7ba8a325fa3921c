//! Session API
//!
//! [`SessionManager`] is the surface callers use: start a session, send it
//! new input, resume it after a pause, cancel it, inspect it, close it.
//! Every call is scoped by an explicit session id; nothing about a session
//! lives outside its checkpoints and the registry entry of a running turn.

mod registry;

pub use registry::{RunGuard, SessionRegistry};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::checkpoint::{Checkpoint, SessionStatus};
use crate::error::{CheckpointError, ClassifiedError, StateError};
use crate::runtime::{EventStream, ExecutionEvent, Executor};
use crate::state::WorkflowState;
use crate::workflow::NodeKey;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} already has a run in flight")]
    Busy(String),

    #[error("session {0} is closed")]
    Closed(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("invalid patch: {0}")]
    InvalidPatch(#[from] StateError),
}

/// A launched run: its session id plus the event stream.
#[derive(Debug)]
pub struct RunHandle<S, K> {
    pub session_id: String,
    pub events: EventStream<S, K>,
}

impl<S, K> RunHandle<S, K> {
    /// Wait for the run to end and return its terminal event.
    pub async fn finish(self) -> Option<ExecutionEvent<S, K>> {
        self.events.terminal().await
    }
}

/// What `get_state` reports about a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot<S, K> {
    pub session_id: String,
    pub state: S,
    pub pending: Option<K>,
    pub status: SessionStatus,
    pub step: usize,
    /// Whether a run is in flight right now
    pub running: bool,
    /// Failure that ended the most recent run in this process
    pub last_error: Option<ClassifiedError>,
}

/// Session-scoped front end over an [`Executor`].
pub struct SessionManager<S: WorkflowState, K: NodeKey> {
    executor: Arc<Executor<S, K>>,
    registry: Arc<SessionRegistry>,
    permits: Arc<Semaphore>,
}

impl<S: WorkflowState, K: NodeKey> Clone for SessionManager<S, K> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            registry: Arc::clone(&self.registry),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<S: WorkflowState, K: NodeKey> SessionManager<S, K> {
    pub fn new(executor: Executor<S, K>) -> Self {
        let permits = executor.config().max_concurrent_runs.max(1);
        Self {
            executor: Arc::new(executor),
            registry: Arc::new(SessionRegistry::new()),
            permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn executor(&self) -> &Executor<S, K> {
        &self.executor
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Open a new session and run its first turn.
    pub fn start(&self, input: S::Update) -> Result<RunHandle<S, K>, SessionError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session_id = %session_id, "Session started");
        self.launch(session_id, input)
    }

    /// Run a new turn on an existing (or not yet persisted) session.
    pub async fn send(
        &self,
        session_id: &str,
        input: S::Update,
    ) -> Result<RunHandle<S, K>, SessionError> {
        if let Some(checkpoint) = self.executor.checkpointer().latest(session_id).await? {
            if checkpoint.status == SessionStatus::Closed {
                return Err(SessionError::Closed(session_id.to_string()));
            }
        }
        self.launch(session_id.to_string(), input)
    }

    /// Continue a paused, failed or interrupted session with a patch.
    /// Returns `None` for sessions with nothing to resume.
    pub async fn resume(
        &self,
        session_id: &str,
        patch: S::Update,
    ) -> Result<Option<RunHandle<S, K>>, SessionError> {
        let resumable = self
            .executor
            .checkpointer()
            .latest(session_id)
            .await?
            .is_some_and(|checkpoint| !checkpoint.status.is_terminal());
        if !resumable {
            tracing::debug!(session_id, "Nothing to resume");
            return Ok(None);
        }
        self.launch(session_id.to_string(), patch).map(Some)
    }

    /// Like [`resume`](Self::resume), with the patch given as JSON and
    /// checked against the state schema.
    pub async fn resume_json(
        &self,
        session_id: &str,
        patch: serde_json::Value,
    ) -> Result<Option<RunHandle<S, K>>, SessionError> {
        let patch = S::parse_update(patch)?;
        self.resume(session_id, patch).await
    }

    /// Ask the in-flight run to stop before its next node. Returns false when
    /// nothing was running.
    pub fn cancel(&self, session_id: &str) -> bool {
        let cancelled = self.registry.cancel(session_id);
        if cancelled {
            tracing::info!(session_id, "Cancellation requested");
        }
        cancelled
    }

    pub async fn get_state(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionSnapshot<S, K>>, SessionError> {
        let Some(checkpoint) = self.executor.checkpointer().latest(session_id).await? else {
            return Ok(None);
        };
        Ok(Some(SessionSnapshot {
            session_id: checkpoint.session_id,
            state: checkpoint.state,
            pending: checkpoint.pending,
            status: checkpoint.status,
            step: checkpoint.step,
            running: self.registry.is_running(session_id),
            last_error: self.registry.last_error(session_id),
        }))
    }

    /// Archive a session: write a closed checkpoint and drop older ones.
    /// Returns false when the session does not exist or is already closed.
    pub async fn close(&self, session_id: &str) -> Result<bool, SessionError> {
        let guard = self.registry.try_begin(session_id)?;
        let store = self.executor.checkpointer();
        let latest = match store.latest(session_id).await? {
            Some(checkpoint) if checkpoint.status != SessionStatus::Closed => checkpoint,
            _ => {
                drop(guard);
                self.registry.forget(session_id);
                return Ok(false);
            }
        };

        let closed = Checkpoint::new(
            session_id,
            latest.step + 1,
            latest.state,
            None,
            SessionStatus::Closed,
        );
        store.put(&closed).await?;
        store.prune(session_id, 1).await?;
        drop(guard);
        self.registry.forget(session_id);
        tracing::info!(session_id, "Session closed");
        Ok(true)
    }

    fn launch(&self, session_id: String, input: S::Update) -> Result<RunHandle<S, K>, SessionError> {
        let guard = self.registry.try_begin(&session_id)?;
        let (sink, events) = EventStream::channel();
        let executor = Arc::clone(&self.executor);
        let registry = Arc::clone(&self.registry);
        let permits = Arc::clone(&self.permits);
        let id = session_id.clone();

        tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let _permit = permits.acquire_owned().await.ok();
            let outcome = executor.drive(&id, input, guard.cancel_token(), &sink).await;
            registry.record_outcome(&id, outcome.error().cloned());
            // Release the session before the terminal event so a caller
            // reacting to it can start the next turn immediately.
            drop(guard);
            sink.emit(outcome.into_event(id));
        });

        Ok(RunHandle { session_id, events })
    }
}

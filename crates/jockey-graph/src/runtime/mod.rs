//! Executor - drives one session through the graph
//!
//! A run loads the latest checkpoint of a session, merges the caller's
//! input patch, then repeats Invoke → Merge → Route → Persist until the
//! terminal marker, an interrupt gate, a failure or a cancellation.
//!
//! ```text
//!   latest checkpoint ──► merge input ──► ┌────────────────────────────┐
//!                                         │ invoke node                │
//!                                         │ merge update (reducers)    │
//!                                         │ resolve next (edges)       │
//!                                         │ persist checkpoint         │
//!                                         └──────────┬─────────────────┘
//!                      END / gate / error / cancel ◄─┘
//! ```
//!
//! Failures never write a checkpoint: the failing node's update is
//! discarded and the session can be resumed from the last good state.

mod events;

pub use events::{EventSink, EventStream, ExecutionEvent, RunOutcome};

use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{Checkpoint, Checkpointer, SessionStatus};
use crate::config::EngineConfig;
use crate::error::{ClassifiedError, ErrorAction, ErrorKind, ErrorOrigin, NodeError};
use crate::state::{StateUpdate, WorkflowState};
use crate::workflow::{CompiledGraph, NodeContext, NodeKey, Target};

/// Executes a compiled graph against checkpointed sessions.
pub struct Executor<S: WorkflowState, K: NodeKey> {
    graph: CompiledGraph<S, K>,
    checkpointer: Arc<dyn Checkpointer<S, K>>,
    config: EngineConfig,
}

impl<S: WorkflowState, K: NodeKey> Executor<S, K> {
    pub fn new(graph: CompiledGraph<S, K>, checkpointer: Arc<dyn Checkpointer<S, K>>) -> Self {
        Self {
            graph,
            checkpointer,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn graph(&self) -> &CompiledGraph<S, K> {
        &self.graph
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer<S, K>> {
        &self.checkpointer
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn a run and stream its events. The stream ends after the
    /// terminal event.
    pub fn run(
        self: Arc<Self>,
        session_id: impl Into<String>,
        input: S::Update,
        cancel: CancellationToken,
    ) -> EventStream<S, K> {
        let session_id = session_id.into();
        let (sink, stream) = EventStream::channel();
        tokio::spawn(async move {
            let outcome = self.drive(&session_id, input, &cancel, &sink).await;
            sink.emit(outcome.into_event(session_id));
        });
        stream
    }

    /// Run inline and return the outcome, discarding progress events.
    pub async fn invoke(
        &self,
        session_id: &str,
        input: S::Update,
        cancel: &CancellationToken,
    ) -> RunOutcome<S, K> {
        self.drive(session_id, input, cancel, &EventSink::discard()).await
    }

    /// The run loop. Emits progress events only; the caller turns the
    /// returned outcome into the terminal event.
    pub async fn drive(
        &self,
        session_id: &str,
        input: S::Update,
        cancel: &CancellationToken,
        sink: &EventSink<S, K>,
    ) -> RunOutcome<S, K> {
        let deadline = Instant::now() + self.config.run_timeout;
        let entry = self.graph.entry().clone();

        let (mut state, mut step, pending) = match self.checkpointer.latest(session_id).await {
            Ok(Some(checkpoint)) if checkpoint.status == SessionStatus::Closed => {
                let error = self.engine_error(
                    &entry,
                    ErrorKind::Validation,
                    format!("session {session_id} is closed"),
                );
                return self.halt(session_id, error, checkpoint.state);
            }
            Ok(Some(checkpoint)) => (checkpoint.state, checkpoint.step, checkpoint.pending),
            Ok(None) => (S::default(), 0, None),
            Err(err) => {
                let error = self.engine_error(
                    &entry,
                    ErrorKind::ExternalCallFailure,
                    format!("failed to load checkpoint: {err}"),
                );
                return self.halt(session_id, error, S::default());
            }
        };
        let mut current = pending.unwrap_or(entry);

        tracing::info!(session_id, node = %current, step, "Run started");
        sink.emit(ExecutionEvent::RunStarted {
            session_id: session_id.to_string(),
            node: current.clone(),
            step,
        });

        if !input.is_empty() {
            let merged = match state.apply_update(input) {
                Ok(merged) => merged,
                Err(err) => {
                    let error = self.classify(&current, NodeError::from(err));
                    return self.halt(session_id, error, state);
                }
            };
            let status = self.status_before(&current);
            if let Err(error) = self
                .persist(session_id, step + 1, &merged, Some(&current), status, None)
                .await
            {
                return self.halt(session_id, error, state);
            }
            state = merged;
            step += 1;
        }

        let mut invocations = 0usize;
        loop {
            if cancel.is_cancelled() {
                tracing::info!(session_id, node = %current, step, "Run cancelled");
                return RunOutcome::Interrupted { state };
            }

            if invocations >= self.config.max_steps {
                let error = self.engine_error(
                    &current,
                    ErrorKind::ResourceExhaustion,
                    format!("step limit of {} reached", self.config.max_steps),
                );
                return self.halt(session_id, error, state);
            }

            let Some(node) = self.graph.node(&current) else {
                let error = self.engine_error(
                    &current,
                    ErrorKind::Validation,
                    format!("node {current} is not part of graph {}", self.graph.name()),
                );
                return self.halt(session_id, error, state);
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let error = self.engine_error(
                    &current,
                    ErrorKind::ResourceExhaustion,
                    format!("run exceeded {:?}", self.config.run_timeout),
                );
                return self.halt(session_id, error, state);
            }
            let budget = self.config.node_timeout.min(remaining);

            tracing::debug!(session_id, node = %current, step, "Node started");
            sink.emit(ExecutionEvent::NodeStarted {
                session_id: session_id.to_string(),
                node: current.clone(),
                step,
            });
            invocations += 1;

            let ctx = NodeContext {
                session_id,
                step,
                node: &current,
                state: &state,
            };
            let result = match timeout(budget, node.run(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::exhausted(format!(
                    "node {current} did not finish within {budget:?}"
                ))),
            };

            let (merged, next) = match result.and_then(|update| self.advance(&current, &state, update)) {
                Ok(advanced) => advanced,
                Err(err) => {
                    let error = ClassifiedError::classify(node.origin(), &current, err);
                    match self.config.error_policy.action(error.kind) {
                        ErrorAction::ReportAndContinue => match self.recover(&current, &state, &error) {
                            Some(advanced) => {
                                tracing::warn!(session_id, node = %current, error = %error, "Node failed, continuing");
                                sink.emit(ExecutionEvent::ErrorReported {
                                    session_id: session_id.to_string(),
                                    error,
                                });
                                advanced
                            }
                            None => return self.halt(session_id, error, state),
                        },
                        ErrorAction::Halt => return self.halt(session_id, error, state),
                    }
                }
            };

            let (status, pending) = match &next {
                Target::End => (SessionStatus::Idle, None),
                Target::Node(key) if self.graph.is_gate(key) => (SessionStatus::Paused, Some(key)),
                Target::Node(key) => (SessionStatus::InProgress, Some(key)),
            };
            if let Err(error) = self
                .persist(session_id, step + 1, &merged, pending, status, Some(&current))
                .await
            {
                return self.halt(session_id, error, state);
            }
            state = merged;
            step += 1;

            tracing::debug!(session_id, node = %current, step, next = %next, "Node completed");
            sink.emit(ExecutionEvent::NodeCompleted {
                session_id: session_id.to_string(),
                node: current.clone(),
                step,
                next: next.clone(),
            });

            match next {
                Target::End => {
                    tracing::info!(session_id, step, "Run completed");
                    return RunOutcome::Completed { state };
                }
                Target::Node(key) if self.graph.is_gate(&key) => {
                    tracing::info!(session_id, gate = %key, step, "Run paused");
                    return RunOutcome::Paused { gate: key, state };
                }
                Target::Node(key) => current = key,
            }
        }
    }

    /// Merge a node's update and resolve where the graph goes next.
    fn advance(&self, current: &K, state: &S, update: S::Update) -> Result<(S, Target<K>), NodeError> {
        let merged = state.apply_update(update)?;
        let next = self.graph.resolve(current, &merged)?;
        Ok((merged, next))
    }

    /// Merge the state's failure update in place of the discarded one.
    fn recover(&self, current: &K, state: &S, error: &ClassifiedError) -> Option<(S, Target<K>)> {
        let update = state.failure_update(error)?;
        match self.advance(current, state, update) {
            Ok(advanced) => Some(advanced),
            Err(err) => {
                tracing::warn!(node = %current, error = %err, "Failure update could not be applied");
                None
            }
        }
    }

    fn status_before(&self, node: &K) -> SessionStatus {
        if self.graph.is_gate(node) {
            SessionStatus::Paused
        } else {
            SessionStatus::InProgress
        }
    }

    async fn persist(
        &self,
        session_id: &str,
        step: usize,
        state: &S,
        pending: Option<&K>,
        status: SessionStatus,
        produced_by: Option<&K>,
    ) -> Result<(), ClassifiedError> {
        let mut checkpoint = Checkpoint::new(session_id, step, state.clone(), pending.cloned(), status)
            .with_metadata("graph", self.graph.name());
        if let Some(node) = produced_by {
            checkpoint = checkpoint.with_metadata("node", node.to_string());
        }

        let blame = produced_by.or(pending).unwrap_or(self.graph.entry());
        self.checkpointer.put(&checkpoint).await.map_err(|err| {
            self.engine_error(
                blame,
                ErrorKind::ExternalCallFailure,
                format!("failed to persist checkpoint {step}: {err}"),
            )
        })?;
        tracing::debug!(session_id, step, ?status, "Checkpoint saved");

        let keep = self.config.checkpoint_retention;
        if keep > 0 {
            if let Err(err) = self.checkpointer.prune(session_id, keep).await {
                tracing::warn!(session_id, error = %err, "Checkpoint pruning failed");
            }
        }
        Ok(())
    }

    fn origin_of(&self, node: &K) -> ErrorOrigin {
        self.graph
            .node(node)
            .map(|n| n.origin())
            .unwrap_or(ErrorOrigin::Router)
    }

    fn classify(&self, node: &K, err: NodeError) -> ClassifiedError {
        ClassifiedError::classify(self.origin_of(node), node, err)
    }

    /// Engine-level failures are attributed to the node that was current.
    fn engine_error(&self, node: &K, kind: ErrorKind, detail: String) -> ClassifiedError {
        ClassifiedError::new(self.origin_of(node), kind, node.to_string(), detail)
    }

    fn halt(&self, session_id: &str, error: ClassifiedError, state: S) -> RunOutcome<S, K> {
        match error.kind {
            ErrorKind::Unknown | ErrorKind::ResourceExhaustion => {
                tracing::error!(session_id, error = %error, "Run failed")
            }
            _ => tracing::warn!(session_id, error = %error, "Run failed"),
        }
        RunOutcome::Failed { error, state }
    }
}

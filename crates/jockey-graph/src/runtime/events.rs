//! Execution events
//!
//! Events are progress telemetry. Dropping the receiving end never stops a
//! run; correctness rests on the checkpoint alone.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::ClassifiedError;
use crate::workflow::Target;

/// One transition observed while driving a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent<S, K> {
    RunStarted {
        session_id: String,
        node: K,
        step: usize,
    },
    NodeStarted {
        session_id: String,
        node: K,
        step: usize,
    },
    NodeCompleted {
        session_id: String,
        node: K,
        step: usize,
        next: Target<K>,
    },
    /// A failure handled by the report-and-continue policy.
    ErrorReported {
        session_id: String,
        error: ClassifiedError,
    },
    Completed {
        session_id: String,
        state: S,
    },
    Paused {
        session_id: String,
        gate: K,
        state: S,
    },
    Failed {
        session_id: String,
        error: ClassifiedError,
        state: S,
    },
    Interrupted {
        session_id: String,
        state: S,
    },
}

impl<S, K> ExecutionEvent<S, K> {
    pub fn session_id(&self) -> &str {
        match self {
            ExecutionEvent::RunStarted { session_id, .. }
            | ExecutionEvent::NodeStarted { session_id, .. }
            | ExecutionEvent::NodeCompleted { session_id, .. }
            | ExecutionEvent::ErrorReported { session_id, .. }
            | ExecutionEvent::Completed { session_id, .. }
            | ExecutionEvent::Paused { session_id, .. }
            | ExecutionEvent::Failed { session_id, .. }
            | ExecutionEvent::Interrupted { session_id, .. } => session_id,
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::Completed { .. }
                | ExecutionEvent::Paused { .. }
                | ExecutionEvent::Failed { .. }
                | ExecutionEvent::Interrupted { .. }
        )
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome<S, K> {
    /// The terminal marker was reached.
    Completed { state: S },
    /// Stopped in front of an interrupt gate; resume to continue.
    Paused { gate: K, state: S },
    /// Halted on a classified error. `state` is the last persisted state.
    Failed { error: ClassifiedError, state: S },
    /// Cancelled between nodes. `state` is the last merged state.
    Interrupted { state: S },
}

impl<S, K> RunOutcome<S, K> {
    pub fn state(&self) -> &S {
        match self {
            RunOutcome::Completed { state }
            | RunOutcome::Paused { state, .. }
            | RunOutcome::Failed { state, .. }
            | RunOutcome::Interrupted { state } => state,
        }
    }

    pub fn into_state(self) -> S {
        match self {
            RunOutcome::Completed { state }
            | RunOutcome::Paused { state, .. }
            | RunOutcome::Failed { state, .. }
            | RunOutcome::Interrupted { state } => state,
        }
    }

    pub fn error(&self) -> Option<&ClassifiedError> {
        match self {
            RunOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn into_event(self, session_id: impl Into<String>) -> ExecutionEvent<S, K> {
        let session_id = session_id.into();
        match self {
            RunOutcome::Completed { state } => ExecutionEvent::Completed { session_id, state },
            RunOutcome::Paused { gate, state } => ExecutionEvent::Paused {
                session_id,
                gate,
                state,
            },
            RunOutcome::Failed { error, state } => ExecutionEvent::Failed {
                session_id,
                error,
                state,
            },
            RunOutcome::Interrupted { state } => ExecutionEvent::Interrupted { session_id, state },
        }
    }
}

/// Sending half handed to the executor loop.
#[derive(Debug)]
pub struct EventSink<S, K> {
    tx: Option<mpsc::UnboundedSender<ExecutionEvent<S, K>>>,
}

impl<S, K> Clone for EventSink<S, K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S, K> EventSink<S, K> {
    /// A sink that drops every event.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Best-effort send; a closed receiver is ignored.
    pub fn emit(&self, event: ExecutionEvent<S, K>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Stream of events for one run, ending after the terminal event.
#[derive(Debug)]
pub struct EventStream<S, K> {
    rx: mpsc::UnboundedReceiver<ExecutionEvent<S, K>>,
}

impl<S, K> EventStream<S, K> {
    /// Create a connected sink/stream pair.
    pub fn channel() -> (EventSink<S, K>, EventStream<S, K>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx: Some(tx) }, EventStream { rx })
    }

    /// Drain the stream and return the terminal event, if any was sent.
    pub async fn terminal(mut self) -> Option<ExecutionEvent<S, K>> {
        let mut last = None;
        while let Some(event) = self.rx.recv().await {
            if event.is_terminal() {
                last = Some(event);
            }
        }
        last
    }
}

impl<S, K> Stream for EventStream<S, K> {
    type Item = ExecutionEvent<S, K>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

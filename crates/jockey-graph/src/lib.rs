//! jockey-graph: stateful graph orchestration for conversational agents
//!
//! A workflow is a graph of async nodes threading one typed state value.
//! Nodes return partial updates which are merged by per-field reducers,
//! checkpointed after every step and routed by static or state-driven
//! conditional edges. Interrupt gates pause a session until a caller
//! resumes it. Failures are attributed to their node and classified.
//!
//! The [`jockey`] module wires a conversational video agent on top:
//! supervisor, planner, tool-calling workers, a reflector and a human
//! review gate.
//!
//! ```rust,ignore
//! use jockey_graph::jockey::{build_jockey_graph, JockeyDeps, JockeyOptions, SessionUpdate};
//! use jockey_graph::{Executor, MemoryCheckpointer, SessionManager};
//!
//! let graph = build_jockey_graph(deps, JockeyOptions::default())?;
//! let executor = Executor::new(graph, Arc::new(MemoryCheckpointer::new()));
//! let sessions = SessionManager::new(executor);
//!
//! let run = sessions.start(SessionUpdate::user_input("find two dunks"))?;
//! let outcome = run.finish().await;
//! ```

pub mod artifacts;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod jockey;
pub mod llm;
pub mod reducer;
pub mod runtime;
pub mod session;
pub mod state;
pub mod tools;
pub mod workflow;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use artifacts::{ArtifactError, ArtifactStore, FileArtifactStore, MemoryArtifactStore};
pub use checkpoint::{
    create_checkpointer, Checkpoint, Checkpointer, CheckpointerConfig, FileCheckpointer,
    MemoryCheckpointer, SessionStatus,
};
#[cfg(feature = "checkpointer-sqlite")]
pub use checkpoint::SqliteCheckpointer;
pub use config::EngineConfig;
pub use error::{
    CheckpointError, ClassifiedError, ErrorAction, ErrorKind, ErrorOrigin, ErrorPolicy, NodeError,
    StateError,
};
pub use llm::{
    decide_outcome, generate_json, DecisionError, DecisionRequest, DecisionService,
    GenerationRequest, RigDecisionService, ScriptedDecisionService,
};
pub use reducer::{FieldSpec, FieldUpdate, ReducerKind};
pub use runtime::{EventSink, EventStream, ExecutionEvent, Executor, RunOutcome};
pub use session::{RunHandle, SessionError, SessionManager, SessionSnapshot};
pub use state::{StateUpdate, WorkflowState};
pub use tools::{HttpToolExecutor, ScriptedToolExecutor, ToolError, ToolExecutor};
pub use workflow::{CompiledGraph, FnNode, Node, NodeContext, NodeKey, Target, WorkflowGraph};

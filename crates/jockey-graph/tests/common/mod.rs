//! Shared fixtures for the agent integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Notify;

use jockey_graph::jockey::{
    build_jockey_graph, JockeyDeps, JockeyNode, JockeyOptions, SessionState, SIMPLE_VIDEO_SEARCH,
};
use jockey_graph::{
    Checkpointer, EngineConfig, ExecutionEvent, Executor, MemoryArtifactStore, MemoryCheckpointer,
    ScriptedDecisionService, ScriptedToolExecutor, SessionManager, ToolError, ToolExecutor,
};

pub type Store = Arc<dyn Checkpointer<SessionState, JockeyNode>>;
pub type Event = ExecutionEvent<SessionState, JockeyNode>;

pub fn memory_store() -> Store {
    Arc::new(MemoryCheckpointer::new())
}

/// Two search hits from two different videos.
pub fn two_hits() -> Value {
    json!([
        {"video_id": "6515d2d7", "start": 12.0, "end": 18.5, "score": 91.2, "video_title": "Finals G7"},
        {"video_id": "6515d2e9", "start": 40.25, "end": 44.0, "score": 86.7, "video_title": "Dunk contest"}
    ])
}

/// Decision script for one search turn: supervisor, planner, argument
/// derivation. The summary is left to the caller.
pub fn search_turn(decisions: &ScriptedDecisionService) {
    decisions.push("route", "planner");
    decisions.push("plan", "1. search for dunk clips\n2. present them");
    decisions.push("next-step", SIMPLE_VIDEO_SEARCH);
    decisions.push("tool-arguments", r#"{"query": "dunk", "top_n": 2}"#);
}

/// Everything a test needs to drive the agent.
pub struct Harness {
    pub decisions: Arc<ScriptedDecisionService>,
    pub tools: Arc<dyn ToolExecutor>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub store: Store,
}

impl Harness {
    pub fn new(tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            decisions: Arc::new(ScriptedDecisionService::new()),
            tools,
            artifacts: Arc::new(MemoryArtifactStore::new()),
            store: memory_store(),
        }
    }

    pub fn scripted(tools: ScriptedToolExecutor) -> Self {
        Self::new(Arc::new(tools))
    }

    pub fn with_store(mut self, store: Store) -> Self {
        self.store = store;
        self
    }

    pub fn deps(&self) -> JockeyDeps {
        JockeyDeps {
            decisions: self.decisions.clone(),
            tools: self.tools.clone(),
            artifacts: self.artifacts.clone(),
        }
    }

    pub fn manager(&self, options: JockeyOptions, config: EngineConfig) -> SessionManager<SessionState, JockeyNode> {
        let graph = build_jockey_graph(self.deps(), options).expect("agent graph builds");
        SessionManager::new(Executor::new(graph, self.store.clone()).with_config(config))
    }

    pub fn default_manager(&self) -> SessionManager<SessionState, JockeyNode> {
        self.manager(JockeyOptions::default(), EngineConfig::default())
    }
}

/// Tool executor that blocks inside the call until released.
#[derive(Default)]
pub struct BlockingTools {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl ToolExecutor for BlockingTools {
    async fn invoke(&self, _tool: &str, _args: Value) -> Result<Value, ToolError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(two_hits())
    }
}

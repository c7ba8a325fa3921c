//! Jockey: a conversational video agent built on the workflow engine
//!
//! A supervisor decides whether a request needs a plan. The planner writes
//! one, picks the next tool and selects cached search results. Workers each
//! make one tool call. The reflector summarises the outcome for the user.
//! In review mode every worker output pauses at the `ask-human` gate.

mod graph;
pub mod nodes;
pub mod prompts;
mod state;

pub use graph::{build_jockey_graph, JockeyDeps, JockeyOptions};
pub use state::{FeedbackEntry, Message, ResultRecord, Role, SessionState, SessionUpdate};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const SIMPLE_VIDEO_SEARCH: &str = "simple-video-search";
pub const GIST_TEXT_GENERATION: &str = "gist-text-generation";
pub const SUMMARIZE_TEXT_GENERATION: &str = "summarize-text-generation";
pub const FREE_TEXT_GENERATION: &str = "free-text-generation";
pub const COMBINE_CLIPS: &str = "combine-clips";
pub const REMOVE_SEGMENT: &str = "remove-segment";

/// Nodes of the agent graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JockeyNode {
    Supervisor,
    Planner,
    VideoSearch,
    VideoTextGeneration,
    VideoEditing,
    Reflect,
    AskHuman,
}

impl JockeyNode {
    pub const ALL: [JockeyNode; 7] = [
        JockeyNode::Supervisor,
        JockeyNode::Planner,
        JockeyNode::VideoSearch,
        JockeyNode::VideoTextGeneration,
        JockeyNode::VideoEditing,
        JockeyNode::Reflect,
        JockeyNode::AskHuman,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JockeyNode::Supervisor => "supervisor",
            JockeyNode::Planner => "planner",
            JockeyNode::VideoSearch => "video-search",
            JockeyNode::VideoTextGeneration => "video-text-generation",
            JockeyNode::VideoEditing => "video-editing",
            JockeyNode::Reflect => "reflect",
            JockeyNode::AskHuman => "ask-human",
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(
            self,
            JockeyNode::VideoSearch | JockeyNode::VideoTextGeneration | JockeyNode::VideoEditing
        )
    }
}

impl fmt::Display for JockeyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown node: {0}")]
pub struct UnknownNode(pub String);

impl FromStr for JockeyNode {
    type Err = UnknownNode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JockeyNode::ALL
            .into_iter()
            .find(|node| node.as_str() == s)
            .ok_or_else(|| UnknownNode(s.to_string()))
    }
}

/// A worker node and the tools it may call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub node: JockeyNode,
    pub description: &'static str,
    pub tools: Vec<&'static str>,
    /// Results are search hits and land in the result cache.
    pub retrieval: bool,
    /// Outputs are memoised in the artifact store by tool and arguments.
    pub cached: bool,
}

impl WorkerSpec {
    pub fn owns(&self, tool: &str) -> bool {
        self.tools.contains(&tool)
    }

    /// The three workers of a stock deployment.
    pub fn defaults() -> Vec<WorkerSpec> {
        vec![
            WorkerSpec {
                node: JockeyNode::VideoSearch,
                description: "finds clips matching a natural language query",
                tools: vec![SIMPLE_VIDEO_SEARCH],
                retrieval: true,
                cached: false,
            },
            WorkerSpec {
                node: JockeyNode::VideoTextGeneration,
                description: "writes gists, summaries and free text about a video",
                tools: vec![
                    GIST_TEXT_GENERATION,
                    SUMMARIZE_TEXT_GENERATION,
                    FREE_TEXT_GENERATION,
                ],
                retrieval: false,
                cached: false,
            },
            WorkerSpec {
                node: JockeyNode::VideoEditing,
                description: "combines clips and removes segments from videos",
                tools: vec![COMBINE_CLIPS, REMOVE_SEGMENT],
                retrieval: false,
                cached: true,
            },
        ]
    }
}

//! Tool executor interface
//!
//! Workers reach the concrete task backends (video search, editing, text
//! generation) through [`ToolExecutor`], exactly one call per worker step.
//! Failed calls are never retried here.

mod http;
mod scripted;

pub use http::HttpToolExecutor;
pub use scripted::ScriptedToolExecutor;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::NodeError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("tool {tool} returned HTTP {status}: {body}")]
    Status { tool: String, status: u16, body: String },

    #[error("tool {tool} timed out")]
    Timeout { tool: String },

    #[error("could not reach tool {tool}: {message}")]
    Transport { tool: String, message: String },

    #[error("tool {tool} returned an unreadable body: {message}")]
    InvalidResponse { tool: String, message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

impl ToolError {
    pub fn tool(&self) -> &str {
        match self {
            ToolError::Status { tool, .. }
            | ToolError::Timeout { tool }
            | ToolError::Transport { tool, .. }
            | ToolError::InvalidResponse { tool, .. }
            | ToolError::UnknownTool(tool) => tool,
        }
    }
}

impl From<ToolError> for NodeError {
    fn from(err: ToolError) -> Self {
        let tool = err.tool().to_string();
        match err {
            ToolError::UnknownTool(_) => NodeError::validation(err.to_string()),
            _ => NodeError::external(err.to_string()),
        }
        .with_function(tool)
    }
}

/// Executes one named tool with JSON arguments.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, tool: &str, args: Value) -> Result<Value, ToolError>;
}

//! Scripted tool executor for tests and dry runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use super::{ToolError, ToolExecutor};

/// Replays canned results, one queue per tool, and records every call.
#[derive(Debug, Default)]
pub struct ScriptedToolExecutor {
    script: Mutex<HashMap<String, VecDeque<Result<Value, ToolError>>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returns(self, tool: &str, result: Value) -> Self {
        self.push(tool, Ok(result));
        self
    }

    pub fn fails(self, tool: &str, error: ToolError) -> Self {
        self.push(tool, Err(error));
        self
    }

    pub fn push(&self, tool: &str, result: Result<Value, ToolError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tool.to_string())
            .or_default()
            .push_back(result);
    }

    /// `(tool, args)` of every call so far.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedToolExecutor {
    async fn invoke(&self, tool: &str, args: Value) -> Result<Value, ToolError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((tool.to_string(), args));
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(tool)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ToolError::UnknownTool(tool.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_in_order_and_records() {
        let tools = ScriptedToolExecutor::new()
            .returns("combine-clips", json!({"url": "a.mp4"}))
            .fails(
                "combine-clips",
                ToolError::Timeout {
                    tool: "combine-clips".into(),
                },
            );

        let first = tools.invoke("combine-clips", json!({"n": 1})).await.unwrap();
        assert_eq!(first["url"], "a.mp4");
        assert!(tools.invoke("combine-clips", json!({"n": 2})).await.is_err());
        assert_eq!(
            tools.invoke("combine-clips", json!({})).await,
            Err(ToolError::UnknownTool("combine-clips".into()))
        );
        assert_eq!(tools.calls().len(), 3);
        assert_eq!(tools.calls()[1].1, json!({"n": 2}));
    }
}

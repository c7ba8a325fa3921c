use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::artifacts::ArtifactStore;
use crate::error::{ErrorOrigin, NodeError};
use crate::jockey::{
    prompts, FeedbackEntry, JockeyNode, Message, ResultRecord, SessionState, SessionUpdate,
    WorkerSpec,
};
use crate::llm::{generate_json, DecisionService, GenerationRequest};
use crate::reducer::FieldUpdate;
use crate::tools::ToolExecutor;
use crate::workflow::{Node, NodeContext};

/// Executes the pending tool call of the worker it is bound to.
///
/// Arguments are derived by the decision service from the plan and the
/// selected results; exactly one tool call is made per run. Retrieval
/// workers add their hits to the result cache under `call_{n}`. Cached
/// workers look up `{tool}:{arguments}` in the artifact store first.
pub struct WorkerNode {
    spec: WorkerSpec,
    decisions: Arc<dyn DecisionService>,
    tools: Arc<dyn ToolExecutor>,
    artifacts: Arc<dyn ArtifactStore>,
    review: bool,
}

impl WorkerNode {
    pub fn new(
        spec: WorkerSpec,
        decisions: Arc<dyn DecisionService>,
        tools: Arc<dyn ToolExecutor>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            spec,
            decisions,
            tools,
            artifacts,
            review: false,
        }
    }

    /// Pause for human review after every call.
    pub fn with_review(mut self, review: bool) -> Self {
        self.review = review;
        self
    }

    async fn derive_arguments(&self, state: &SessionState, tool: &str) -> Result<Value, NodeError> {
        let request = GenerationRequest::new(
            prompts::purpose::TOOL_ARGUMENTS,
            prompts::tool_arguments(tool),
            prompts::working_context(state),
        );
        let args: Value = generate_json(self.decisions.as_ref(), &request)
            .await
            .map_err(|e| {
                NodeError::from(e)
                    .with_origin(ErrorOrigin::InstructionDeriver)
                    .with_function(tool)
            })?;
        if !args.is_object() {
            return Err(NodeError::malformed(format!("arguments for {tool} must be a JSON object"))
                .with_origin(ErrorOrigin::InstructionDeriver)
                .with_function(tool));
        }
        Ok(args)
    }

    async fn call(&self, tool: &str, args: Value) -> Result<Value, NodeError> {
        if !self.spec.cached {
            return Ok(self.tools.invoke(tool, args).await?);
        }

        let key = format!("{tool}:{args}");
        if let Some(hit) = self.artifacts.get(&key).await? {
            tracing::debug!(tool, "Artifact cache hit");
            return Ok(hit);
        }
        let result = self.tools.invoke(tool, args).await?;
        self.artifacts.put(&key, &result).await?;
        Ok(result)
    }

    /// Parse search hits and flag those whose clip is already rendered.
    async fn collect_hits(&self, tool: &str, result: Value) -> Result<Vec<ResultRecord>, NodeError> {
        let mut hits: Vec<ResultRecord> = serde_json::from_value(result).map_err(|e| {
            NodeError::external(format!("unexpected search result shape: {e}")).with_function(tool)
        })?;
        for hit in &mut hits {
            if self.artifacts.contains(&hit.clip_file_name()).await? {
                hit.extra.insert("clip_cached".into(), Value::Bool(true));
            }
        }
        Ok(hits)
    }
}

#[async_trait]
impl Node<SessionState, JockeyNode> for WorkerNode {
    fn key(&self) -> JockeyNode {
        self.spec.node
    }

    fn origin(&self) -> ErrorOrigin {
        ErrorOrigin::Worker
    }

    async fn run(
        &self,
        ctx: NodeContext<'_, SessionState, JockeyNode>,
    ) -> Result<SessionUpdate, NodeError> {
        let state = ctx.state;
        let node = self.spec.node;
        let tool = state
            .pending_tool_call
            .as_deref()
            .ok_or_else(|| NodeError::validation(format!("{node} has no pending tool call")))?;
        if !self.spec.owns(tool) {
            return Err(NodeError::validation(format!("{tool} is not a tool of {node}"))
                .with_function(tool));
        }

        let args = self.derive_arguments(state, tool).await?;
        tracing::info!(session_id = ctx.session_id, node = %node, tool, "Calling tool");
        let result = self.call(tool, args).await?;

        let mut update = SessionUpdate {
            pending_tool_call: FieldUpdate::Clear,
            next_node: FieldUpdate::Set(if self.review {
                JockeyNode::AskHuman
            } else {
                JockeyNode::Reflect
            }),
            ..SessionUpdate::default()
        };

        let content = if self.spec.retrieval {
            let hits = self.collect_hits(tool, result).await?;
            let content = serde_json::to_string(&hits).map_err(|e| {
                NodeError::unknown("could not encode search hits")
                    .with_source(e)
                    .with_function(tool)
            })?;
            let key = format!("call_{}", state.result_cache.len() + 1);
            update.result_cache = BTreeMap::from([(key, hits)]);
            content
        } else {
            match result {
                Value::String(text) => text,
                other => other.to_string(),
            }
        };

        if self.review {
            update.feedback_log.push(FeedbackEntry {
                origin_node: node,
                origin_content: content.clone(),
                human_feedback: String::new(),
                tool_call: Some(tool.to_string()),
            });
        }
        update.history.push(Message::tool(node.as_str(), content));
        Ok(update)
    }
}

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{ErrorOrigin, NodeError};
use crate::jockey::{prompts, JockeyNode, Message, SessionState, SessionUpdate, WorkerSpec};
use crate::llm::{
    decide_outcome, generate_json, DecisionRequest, DecisionService, GenerationRequest,
};
use crate::reducer::FieldUpdate;
use crate::workflow::{Node, NodeContext};

/// Writes the plan, picks the next tool call and selects cached results.
pub struct PlannerNode {
    decisions: Arc<dyn DecisionService>,
    workers: Vec<WorkerSpec>,
}

impl PlannerNode {
    pub fn new(decisions: Arc<dyn DecisionService>, workers: Vec<WorkerSpec>) -> Self {
        Self { decisions, workers }
    }

    /// Every tool name plus `reflect`.
    fn next_step_options(&self) -> Vec<&'static str> {
        let mut options: Vec<&'static str> = self
            .workers
            .iter()
            .flat_map(|worker| worker.tools.iter().copied())
            .collect();
        options.push(JockeyNode::Reflect.as_str());
        options
    }

    fn worker_for(&self, tool: &str) -> Option<&WorkerSpec> {
        self.workers.iter().find(|worker| worker.owns(tool))
    }

    async fn select_results(&self, state: &SessionState, plan: &str) -> Result<Vec<String>, NodeError> {
        if state.result_cache.is_empty() {
            return Ok(Vec::new());
        }

        let mut context = prompts::conversation(state);
        let _ = write!(
            context,
            "\nPlan:\n{plan}\n\nCached results:\n{}",
            prompts::cached_result_sets(state)
        );
        let request = GenerationRequest::new(
            prompts::purpose::SELECT_RESULTS,
            prompts::SELECT_RESULTS,
            context,
        );
        let keys: Vec<String> = generate_json(self.decisions.as_ref(), &request).await?;

        if let Some(unknown) = keys.iter().find(|key| !state.result_cache.contains_key(*key)) {
            return Err(NodeError::malformed(format!(
                "selected result set `{unknown}` does not exist"
            )));
        }
        Ok(keys)
    }
}

#[async_trait]
impl Node<SessionState, JockeyNode> for PlannerNode {
    fn key(&self) -> JockeyNode {
        JockeyNode::Planner
    }

    fn origin(&self) -> ErrorOrigin {
        ErrorOrigin::Planner
    }

    async fn run(
        &self,
        ctx: NodeContext<'_, SessionState, JockeyNode>,
    ) -> Result<SessionUpdate, NodeError> {
        let state = ctx.state;
        let mut context = prompts::conversation(state);
        let _ = write!(context, "\nWorkers:\n{}", prompts::workers(&self.workers));

        let plan_request = GenerationRequest::new(prompts::purpose::PLAN, prompts::PLAN, context);
        let plan = self
            .decisions
            .generate(&plan_request)
            .await?
            .trim()
            .to_string();
        if plan.is_empty() {
            return Err(NodeError::malformed("planner produced an empty plan"));
        }

        let step_request = DecisionRequest::new(
            prompts::purpose::NEXT_STEP,
            prompts::NEXT_STEP,
            format!("{}\nPlan:\n{plan}\n", prompts::conversation(state)),
            self.next_step_options(),
        );
        let choice = decide_outcome(self.decisions.as_ref(), &step_request).await?;
        let (next_node, pending_tool_call) = match self.worker_for(&choice) {
            Some(worker) => (worker.node, FieldUpdate::Set(choice)),
            None => (JockeyNode::Reflect, FieldUpdate::Clear),
        };

        let selected = self.select_results(state, &plan).await?;
        tracing::info!(
            session_id = ctx.session_id,
            next = %next_node,
            selected = selected.len(),
            "Plan made"
        );

        Ok(SessionUpdate {
            history: vec![Message::assistant(JockeyNode::Planner.as_str(), plan.clone())],
            next_node: FieldUpdate::Set(next_node),
            plan_made: Some(true),
            active_plan: FieldUpdate::Set(plan),
            pending_tool_call,
            selected_result_keys: Some(selected),
            ..SessionUpdate::default()
        })
    }
}

use async_trait::async_trait;
use std::sync::Arc;

use super::parse_choice;
use crate::error::{ErrorOrigin, NodeError};
use crate::jockey::{prompts, FeedbackEntry, JockeyNode, Message, SessionState, SessionUpdate};
use crate::llm::{decide_outcome, DecisionRequest, DecisionService};
use crate::reducer::FieldUpdate;
use crate::workflow::{Node, NodeContext};

/// Human review gate. The executor pauses before this node; it runs once
/// the session is resumed with (or without) feedback.
///
/// - open review: the reviewed step runs again with the same tool call
/// - answered review: the feedback joins the conversation and the decision
///   service picks who acts on it, the reviewed step first
/// - no review at all: back to the last node that spoke
pub struct AskHumanNode {
    decisions: Arc<dyn DecisionService>,
}

impl AskHumanNode {
    pub fn new(decisions: Arc<dyn DecisionService>) -> Self {
        Self { decisions }
    }

    fn route_to(node: JockeyNode, entry: Option<&FeedbackEntry>) -> SessionUpdate {
        let tool_call = entry
            .filter(|entry| entry.origin_node == node)
            .and_then(|entry| entry.tool_call.clone());
        SessionUpdate {
            next_node: FieldUpdate::Set(node),
            pending_tool_call: tool_call.into(),
            ..SessionUpdate::default()
        }
    }

    /// Workers need a tool call, so only the reviewed one is eligible.
    fn feedback_options(origin: JockeyNode) -> Vec<&'static str> {
        let mut options = vec![origin.as_str()];
        for node in [JockeyNode::Supervisor, JockeyNode::Planner, JockeyNode::Reflect] {
            if node != origin {
                options.push(node.as_str());
            }
        }
        options
    }

    fn last_speaker(state: &SessionState) -> JockeyNode {
        state
            .history
            .iter()
            .rev()
            .filter_map(|message| message.name.as_deref()?.parse::<JockeyNode>().ok())
            .find(|node| !node.is_worker() && *node != JockeyNode::AskHuman)
            .unwrap_or(JockeyNode::Supervisor)
    }
}

#[async_trait]
impl Node<SessionState, JockeyNode> for AskHumanNode {
    fn key(&self) -> JockeyNode {
        JockeyNode::AskHuman
    }

    fn origin(&self) -> ErrorOrigin {
        ErrorOrigin::HumanGate
    }

    async fn run(
        &self,
        ctx: NodeContext<'_, SessionState, JockeyNode>,
    ) -> Result<SessionUpdate, NodeError> {
        let state = ctx.state;
        let Some(entry) = state.feedback_log.last() else {
            return Ok(Self::route_to(Self::last_speaker(state), None));
        };

        if entry.is_open() {
            tracing::info!(session_id = ctx.session_id, origin = %entry.origin_node, "No feedback, repeating step");
            return Ok(Self::route_to(entry.origin_node, Some(entry)));
        }

        let feedback = Message::user(entry.human_feedback.clone())
            .with_id(format!("feedback-{}", state.feedback_log.len()));
        let mut context = prompts::conversation(state);
        context.push_str(&format!("[human] {}\n", entry.human_feedback));
        let request = DecisionRequest::new(
            prompts::purpose::FEEDBACK_ROUTE,
            prompts::FEEDBACK_ROUTE,
            context,
            Self::feedback_options(entry.origin_node),
        );
        let choice = decide_outcome(self.decisions.as_ref(), &request).await?;
        let next = parse_choice(&choice)?;
        tracing::info!(session_id = ctx.session_id, next = %next, "Feedback routed");

        let mut update = Self::route_to(next, Some(entry));
        update.history.push(feedback);
        Ok(update)
    }
}

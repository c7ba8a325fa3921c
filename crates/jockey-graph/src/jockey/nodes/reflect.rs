use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{ErrorOrigin, NodeError};
use crate::jockey::{prompts, JockeyNode, Message, SessionState, SessionUpdate};
use crate::llm::{DecisionService, GenerationRequest};
use crate::reducer::FieldUpdate;
use crate::workflow::{Node, NodeContext};

/// Writes the final reply and closes the plan.
pub struct ReflectNode {
    decisions: Arc<dyn DecisionService>,
}

impl ReflectNode {
    pub fn new(decisions: Arc<dyn DecisionService>) -> Self {
        Self { decisions }
    }
}

#[async_trait]
impl Node<SessionState, JockeyNode> for ReflectNode {
    fn key(&self) -> JockeyNode {
        JockeyNode::Reflect
    }

    fn origin(&self) -> ErrorOrigin {
        ErrorOrigin::Reflector
    }

    async fn run(
        &self,
        ctx: NodeContext<'_, SessionState, JockeyNode>,
    ) -> Result<SessionUpdate, NodeError> {
        let request = GenerationRequest::new(
            prompts::purpose::SUMMARY,
            prompts::REFLECT,
            prompts::working_context(ctx.state),
        );
        let reply = self.decisions.generate(&request).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(NodeError::malformed("reflection produced an empty reply"));
        }

        Ok(SessionUpdate {
            history: vec![Message::assistant(JockeyNode::Reflect.as_str(), reply)],
            next_node: FieldUpdate::Clear,
            plan_made: Some(false),
            active_plan: FieldUpdate::Clear,
            pending_tool_call: FieldUpdate::Clear,
            selected_result_keys: Some(Vec::new()),
            ..SessionUpdate::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::jockey::nodes::fixtures::run;
    use crate::llm::ScriptedDecisionService;
    use crate::state::WorkflowState;

    #[tokio::test]
    async fn test_reply_closes_plan() {
        let decisions = Arc::new(
            ScriptedDecisionService::new().respond("summary", "Here are two dunk clips."),
        );
        let state = SessionState {
            active_plan: Some("1. search".into()),
            plan_made: true,
            next_node: Some(JockeyNode::Reflect),
            selected_result_keys: vec!["call_1".into()],
            ..SessionState::default()
        };

        let update = run(&ReflectNode::new(decisions), &state).await.unwrap();
        let merged = state.apply_update(update).unwrap();
        assert_eq!(merged.history.len(), 1);
        assert_eq!(merged.history[0].content, "Here are two dunk clips.");
        assert_eq!(merged.active_plan, None);
        assert!(!merged.plan_made);
        assert_eq!(merged.next_node, None);
        assert!(merged.selected_result_keys.is_empty());
    }

    #[tokio::test]
    async fn test_blank_reply_is_malformed() {
        let decisions = Arc::new(ScriptedDecisionService::new().respond("summary", " "));
        let err = run(&ReflectNode::new(decisions), &SessionState::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedDecisionOutput);
    }
}

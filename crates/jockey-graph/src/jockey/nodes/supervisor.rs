use async_trait::async_trait;
use std::sync::Arc;

use super::parse_choice;
use crate::error::{ErrorOrigin, NodeError};
use crate::jockey::{prompts, JockeyNode, SessionState, SessionUpdate};
use crate::llm::{decide_outcome, DecisionRequest, DecisionService};
use crate::reducer::FieldUpdate;
use crate::workflow::{Node, NodeContext};

/// Entry router: plan or answer right away.
pub struct SupervisorNode {
    decisions: Arc<dyn DecisionService>,
}

impl SupervisorNode {
    pub fn new(decisions: Arc<dyn DecisionService>) -> Self {
        Self { decisions }
    }
}

#[async_trait]
impl Node<SessionState, JockeyNode> for SupervisorNode {
    fn key(&self) -> JockeyNode {
        JockeyNode::Supervisor
    }

    fn origin(&self) -> ErrorOrigin {
        ErrorOrigin::Router
    }

    async fn run(
        &self,
        ctx: NodeContext<'_, SessionState, JockeyNode>,
    ) -> Result<SessionUpdate, NodeError> {
        let request = DecisionRequest::new(
            prompts::purpose::ROUTE,
            prompts::ROUTE,
            prompts::conversation(ctx.state),
            [JockeyNode::Planner.as_str(), JockeyNode::Reflect.as_str()],
        );
        let choice = decide_outcome(self.decisions.as_ref(), &request).await?;
        let next = parse_choice(&choice)?;
        tracing::debug!(session_id = ctx.session_id, next = %next, "Supervisor routed");

        Ok(SessionUpdate {
            next_node: FieldUpdate::Set(next),
            ..SessionUpdate::default()
        })
    }
}

//! Decision service backed by a rig agent
//!
//! One agent serves every purpose; the request is rendered into a single
//! prompt. Provider configuration (model, preamble, temperature) happens
//! where the agent is built.

use ::rig::agent::Agent;
use ::rig::completion::{CompletionModel, Prompt};
use async_trait::async_trait;
use std::sync::Arc;

use super::{DecisionError, DecisionRequest, DecisionService, GenerationRequest};

/// Adapter from a rig [`Agent`] to [`DecisionService`].
///
/// # Example
///
/// ```rust,ignore
/// use rig::client::{CompletionClient, ProviderClient};
///
/// let client = rig::providers::openai::Client::from_env();
/// let agent = client.agent("gpt-4o-mini").temperature(0.0).build();
/// let service = RigDecisionService::new(agent, "openai");
/// ```
pub struct RigDecisionService<M: CompletionModel> {
    agent: Arc<Agent<M>>,
    name: String,
}

impl<M: CompletionModel> RigDecisionService<M> {
    pub fn new(agent: Agent<M>, name: impl Into<String>) -> Self {
        Self {
            agent: Arc::new(agent),
            name: name.into(),
        }
    }

    async fn prompt(&self, purpose: &str, text: String) -> Result<String, DecisionError> {
        tracing::debug!(service = %self.name, purpose, "Prompting model");
        self.agent
            .prompt(text)
            .await
            .map_err(|e| DecisionError::Service(format!("{} ({purpose}): {e}", self.name)))
    }
}

fn render_decision(request: &DecisionRequest) -> String {
    format!(
        "{}\n\n{}\n\nAnswer with exactly one of the following and nothing else: {}",
        request.instructions,
        request.context,
        request.allowed.join(", ")
    )
}

fn render_generation(request: &GenerationRequest) -> String {
    format!("{}\n\n{}", request.instructions, request.context)
}

#[async_trait]
impl<M> DecisionService for RigDecisionService<M>
where
    M: CompletionModel + 'static,
{
    async fn decide(&self, request: &DecisionRequest) -> Result<String, DecisionError> {
        self.prompt(&request.purpose, render_decision(request)).await
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, DecisionError> {
        self.prompt(&request.purpose, render_generation(request)).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

//! Decision service
//!
//! The opaque component that picks one outcome out of a constrained set or
//! produces free text / structured arguments. In production this is a
//! language model reached through rig; in tests it is a script.
//!
//! The engine never trusts raw output: [`decide_outcome`] accepts only an
//! exact member of the allowed set and [`generate_json`] only parseable
//! JSON. Anything else is a malformed-decision-output error.

mod rig;
mod scripted;

pub use self::rig::RigDecisionService;
pub use scripted::ScriptedDecisionService;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::NodeError;

/// Ask the service to choose among `allowed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// Short tag naming the decision, e.g. `route`
    pub purpose: String,
    pub instructions: String,
    pub context: String,
    pub allowed: Vec<String>,
}

impl DecisionRequest {
    pub fn new(
        purpose: impl Into<String>,
        instructions: impl Into<String>,
        context: impl Into<String>,
        allowed: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            purpose: purpose.into(),
            instructions: instructions.into(),
            context: context.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ask the service for free text or a JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub purpose: String,
    pub instructions: String,
    pub context: String,
}

impl GenerationRequest {
    pub fn new(
        purpose: impl Into<String>,
        instructions: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            purpose: purpose.into(),
            instructions: instructions.into(),
            context: context.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    /// The service could not be reached or refused the request.
    #[error("decision service failed: {0}")]
    Service(String),

    #[error("`{output}` is not one of the allowed outcomes ({})", .allowed.join(", "))]
    Disallowed { output: String, allowed: Vec<String> },

    #[error("unparseable output: {0}")]
    Malformed(String),
}

impl From<DecisionError> for NodeError {
    fn from(err: DecisionError) -> Self {
        match err {
            DecisionError::Service(_) => NodeError::external(err.to_string()),
            DecisionError::Disallowed { .. } | DecisionError::Malformed(_) => {
                NodeError::malformed(err.to_string())
            }
        }
    }
}

/// Opaque decision/generation backend.
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Return the raw chosen outcome. Callers validate it with
    /// [`decide_outcome`].
    async fn decide(&self, request: &DecisionRequest) -> Result<String, DecisionError>;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, DecisionError>;

    fn name(&self) -> &str;
}

/// Ask for a decision and reject anything outside the allowed set.
///
/// Surrounding whitespace is ignored; case and spelling are not.
pub async fn decide_outcome(
    service: &dyn DecisionService,
    request: &DecisionRequest,
) -> Result<String, DecisionError> {
    let raw = service.decide(request).await?;
    let output = raw.trim();
    if request.allowed.iter().any(|allowed| allowed == output) {
        tracing::debug!(purpose = %request.purpose, outcome = output, "Decision accepted");
        Ok(output.to_string())
    } else {
        Err(DecisionError::Disallowed {
            output: output.to_string(),
            allowed: request.allowed.clone(),
        })
    }
}

/// Ask for a JSON document and deserialize it.
pub async fn generate_json<T: DeserializeOwned>(
    service: &dyn DecisionService,
    request: &GenerationRequest,
) -> Result<T, DecisionError> {
    let raw = service.generate(request).await?;
    serde_json::from_str(strip_code_fences(&raw))
        .map_err(|e| DecisionError::Malformed(format!("{} output is not valid JSON: {e}", request.purpose)))
}

/// Models like to wrap JSON in Markdown fences.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    static_assertions::assert_impl_all!(DecisionError: Send, Sync);
    static_assertions::assert_obj_safe!(DecisionService);

    fn route_request() -> DecisionRequest {
        DecisionRequest::new("route", "pick", "ctx", ["planner", "reflect"])
    }

    #[tokio::test]
    async fn test_decide_outcome_accepts_trimmed_member() {
        let service = ScriptedDecisionService::new().respond("route", "  planner\n");
        let outcome = decide_outcome(&service, &route_request()).await.unwrap();
        assert_eq!(outcome, "planner");
    }

    #[tokio::test]
    async fn test_decide_outcome_rejects_non_member() {
        let service = ScriptedDecisionService::new().respond("route", "DO-SOMETHING-UNDEFINED");
        let err = decide_outcome(&service, &route_request()).await.unwrap_err();
        assert!(matches!(err, DecisionError::Disallowed { ref output, .. } if output == "DO-SOMETHING-UNDEFINED"));
        assert_eq!(NodeError::from(err).kind, ErrorKind::MalformedDecisionOutput);
    }

    #[tokio::test]
    async fn test_decide_outcome_is_case_sensitive() {
        let service = ScriptedDecisionService::new().respond("route", "Planner");
        assert!(decide_outcome(&service, &route_request()).await.is_err());
    }

    #[tokio::test]
    async fn test_generate_json_strips_fences() {
        let service = ScriptedDecisionService::new()
            .respond("args", "```json\n{\"query\": \"dunk\", \"top_k\": 2}\n```");
        let request = GenerationRequest::new("args", "derive", "ctx");
        let args: serde_json::Value = generate_json(&service, &request).await.unwrap();
        assert_eq!(args["top_k"], 2);
    }

    #[tokio::test]
    async fn test_generate_json_malformed() {
        let service = ScriptedDecisionService::new().respond("args", "sure, here you go");
        let request = GenerationRequest::new("args", "derive", "ctx");
        let err = generate_json::<serde_json::Value>(&service, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::Malformed(_)));
    }

    #[test]
    fn test_service_error_is_external_call_failure() {
        let err: NodeError = DecisionError::Service("timeout".into()).into();
        assert_eq!(err.kind, ErrorKind::ExternalCallFailure);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("[1, 2]"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```json\n{}\n```  "), "{}");
    }
}

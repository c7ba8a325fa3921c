//! Scripted decision service for tests and dry runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use super::{DecisionError, DecisionRequest, DecisionService, GenerationRequest};

/// Replays canned responses, one queue per purpose.
///
/// `decide` and `generate` both pop from the queue of the request's
/// purpose. An exhausted queue is a service error.
#[derive(Debug, Default)]
pub struct ScriptedDecisionService {
    script: Mutex<HashMap<String, VecDeque<String>>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedDecisionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `purpose`.
    pub fn respond(self, purpose: impl Into<String>, response: impl Into<String>) -> Self {
        self.push(purpose, response);
        self
    }

    pub fn push(&self, purpose: impl Into<String>, response: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(purpose.into())
            .or_default()
            .push_back(response.into());
    }

    /// Purposes requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Responses queued but never consumed.
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }

    fn next(&self, purpose: &str) -> Result<String, DecisionError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(purpose.to_string());
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(purpose)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| DecisionError::Service(format!("no scripted response for `{purpose}`")))
    }
}

#[async_trait]
impl DecisionService for ScriptedDecisionService {
    async fn decide(&self, request: &DecisionRequest) -> Result<String, DecisionError> {
        self.next(&request.purpose)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, DecisionError> {
        self.next(&request.purpose)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queues_are_per_purpose_and_ordered() {
        let service = ScriptedDecisionService::new()
            .respond("route", "planner")
            .respond("plan", "1. search")
            .respond("route", "reflect");

        let route = DecisionRequest::new("route", "", "", ["planner", "reflect"]);
        let plan = GenerationRequest::new("plan", "", "");

        assert_eq!(service.decide(&route).await.unwrap(), "planner");
        assert_eq!(service.generate(&plan).await.unwrap(), "1. search");
        assert_eq!(service.decide(&route).await.unwrap(), "reflect");
        assert_eq!(service.calls(), vec!["route", "plan", "route"]);
        assert_eq!(service.remaining(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_queue_is_service_error() {
        let service = ScriptedDecisionService::new();
        let err = service
            .generate(&GenerationRequest::new("summary", "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::Service(_)));
    }
}

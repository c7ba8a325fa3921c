//! Error taxonomy for the orchestration engine
//!
//! Node failures are raised as [`NodeError`] and attributed by the executor,
//! which wraps them into a [`ClassifiedError`]: originating node, a coarse
//! [`ErrorKind`] and a readable detail. Engine-level failures (step caps,
//! timeouts, checkpoint writes) are expressed through the same shape, so a
//! caller only ever has to handle one error type per session.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The role of the node a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorOrigin {
    Planner,
    Router,
    Worker,
    InstructionDeriver,
    Reflector,
    HumanGate,
}

impl ErrorOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorOrigin::Planner => "planner",
            ErrorOrigin::Router => "router",
            ErrorOrigin::Worker => "worker",
            ErrorOrigin::InstructionDeriver => "instruction-deriver",
            ErrorOrigin::Reflector => "reflector",
            ErrorOrigin::HumanGate => "human-gate",
        }
    }
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure kind, used to pick the error policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    ExternalCallFailure,
    MalformedDecisionOutput,
    ResourceExhaustion,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ExternalCallFailure => "external-call-failure",
            ErrorKind::MalformedDecisionOutput => "malformed-decision-output",
            ErrorKind::ResourceExhaustion => "resource-exhaustion",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the executor does with a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Report the failure and stop; the session stays resumable.
    #[default]
    Halt,
    /// Report the failure, merge the state's failure update and keep routing.
    ReportAndContinue,
}

/// Per-kind policy table.
///
/// Only external-call failures are configurable. Validation errors,
/// malformed decision output, resource exhaustion and unknown failures
/// always halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPolicy {
    pub external_call: ErrorAction,
}

impl ErrorPolicy {
    pub fn action(&self, kind: ErrorKind) -> ErrorAction {
        match kind {
            ErrorKind::ExternalCallFailure => self.external_call,
            _ => ErrorAction::Halt,
        }
    }
}

/// A failure raised by a node body, before the executor attributes it.
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct NodeError {
    pub kind: ErrorKind,
    pub detail: String,
    /// Overrides the node's own origin (e.g. a worker's argument derivation).
    pub origin: Option<ErrorOrigin>,
    /// The domain function that failed, when the node knows it.
    pub function: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl NodeError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            origin: None,
            function: None,
            source: None,
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    pub fn external(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalCallFailure, detail)
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedDecisionOutput, detail)
    }

    pub fn exhausted(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhaustion, detail)
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, detail)
    }

    pub fn with_origin(mut self, origin: ErrorOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// Anything a node could not classify itself ends up as `unknown`.
impl From<anyhow::Error> for NodeError {
    fn from(err: anyhow::Error) -> Self {
        NodeError::unknown(format!("{err:#}"))
    }
}

impl From<StateError> for NodeError {
    fn from(err: StateError) -> Self {
        NodeError::validation(err.to_string())
    }
}

/// A failure attributed to the node it originated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub origin: ErrorOrigin,
    pub kind: ErrorKind,
    /// Name of the graph node that was executing.
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub detail: String,
}

impl ClassifiedError {
    pub fn new(
        origin: ErrorOrigin,
        kind: ErrorKind,
        node: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            kind,
            node: node.into(),
            function: None,
            detail: detail.into(),
        }
    }

    /// Attribute a node failure. The node's own origin applies unless the
    /// error carries a more specific one.
    pub fn classify(node_origin: ErrorOrigin, node: impl fmt::Display, err: NodeError) -> Self {
        let mut detail = err.detail;
        if let Some(source) = &err.source {
            detail = format!("{detail}: {source}");
        }
        Self {
            origin: err.origin.unwrap_or(node_origin),
            kind: err.kind,
            node: node.to_string(),
            function: err.function,
            detail,
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error in {} node", self.kind, self.origin)?;
        if let Some(function) = &self.function {
            write!(f, " ({function})")?;
        }
        write!(f, ": {}", self.detail)
    }
}

impl std::error::Error for ClassifiedError {}

/// Errors raised while merging or parsing state updates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("state patch must be a JSON object")]
    NotAnObject,

    #[error("unknown state field: {0}")]
    UnknownField(String),

    #[error("malformed state patch: {0}")]
    Malformed(String),

    #[error("state invariant violated: {0}")]
    Invariant(String),
}

/// Errors raised by checkpoint backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("checkpoint storage failed: {0}")]
    Storage(String),

    #[error("checkpoint serialization failed: {0}")]
    Serialization(String),

    #[error("checkpoint belongs to session {found}, expected {expected}")]
    SessionMismatch { expected: String, found: String },
}

impl CheckpointError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }
}

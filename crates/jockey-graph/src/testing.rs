//! Small state and key types shared by unit tests.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClassifiedError, ErrorOrigin, NodeError, StateError};
use crate::reducer::{self, FieldSpec, FieldUpdate, ReducerKind};
use crate::state::{StateUpdate, WorkflowState};
use crate::workflow::FnNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    A,
    B,
    C,
    Gate,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::A => "a",
            Step::B => "b",
            Step::C => "c",
            Step::Gate => "gate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceState {
    pub visited: Vec<String>,
    pub route: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceUpdate {
    #[serde(default)]
    pub visited: Vec<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub route: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub note: FieldUpdate<String>,
}

impl TraceUpdate {
    pub fn visit(name: &str) -> Self {
        Self {
            visited: vec![name.to_string()],
            ..Self::default()
        }
    }

    pub fn route(mut self, route: &str) -> Self {
        self.route = FieldUpdate::Set(route.to_string());
        self
    }
}

impl StateUpdate for TraceUpdate {
    fn empty() -> Self {
        Self::default()
    }

    fn is_empty(&self) -> bool {
        self.visited.is_empty() && self.route.is_unchanged() && self.note.is_unchanged()
    }
}

impl WorkflowState for TraceState {
    type Update = TraceUpdate;

    fn schema() -> &'static [FieldSpec] {
        const SCHEMA: &[FieldSpec] = &[
            FieldSpec::new("visited", ReducerKind::AppendOnly),
            FieldSpec::new("route", ReducerKind::LastWriteWins),
            FieldSpec::new("note", ReducerKind::LastWriteWins),
        ];
        SCHEMA
    }

    fn apply_update(&self, update: TraceUpdate) -> Result<Self, StateError> {
        if matches!(&update.note, FieldUpdate::Set(note) if note == "forbidden") {
            return Err(StateError::Invariant("note may not be `forbidden`".into()));
        }
        let mut visited = self.visited.clone();
        visited.extend(update.visited);
        Ok(Self {
            visited,
            route: reducer::last_write_wins_nullable(&self.route, &update.route),
            note: reducer::last_write_wins_nullable(&self.note, &update.note),
        })
    }

    fn failure_update(&self, error: &ClassifiedError) -> Option<TraceUpdate> {
        Some(TraceUpdate {
            note: FieldUpdate::Set(format!("{} failed", error.node)),
            ..TraceUpdate::default().route("recovered")
        })
    }
}

/// Node that records its own visit and optionally sets the route field.
pub fn visit(step: Step, route: Option<&'static str>) -> FnNode<TraceState, Step> {
    FnNode::new(step, ErrorOrigin::Worker, move |_state: &TraceState| {
        let update = TraceUpdate::visit(&step.to_string());
        Ok(match route {
            Some(route) => update.route(route),
            None => update,
        })
    })
}

/// Node that always fails with the given error.
pub fn failing(step: Step, make: fn() -> NodeError) -> FnNode<TraceState, Step> {
    FnNode::new(step, ErrorOrigin::Worker, move |_state: &TraceState| Err(make()))
}

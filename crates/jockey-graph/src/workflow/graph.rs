//! WorkflowGraph builder DSL.
//!
//! Provides a fluent API for registering nodes, static edges, conditional
//! edge-groups and interrupt gates, then validates the whole graph once in
//! [`WorkflowGraph::build`]. A routing value that names no node can only be
//! produced at run time by the state, never by the graph itself.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;

use super::node::{BoxedNode, Node, NodeKey, Target};
use crate::error::NodeError;
use crate::state::WorkflowState;

/// Errors that can occur while building a workflow graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowBuildError {
    #[error("workflow entry point not set")]
    NoEntryPoint,
    #[error("entry point set twice: {0} and {1}")]
    DuplicateEntry(String, String),
    #[error("node registered twice: {0}")]
    DuplicateNode(String),
    #[error("unknown node id: {0}")]
    UnknownNode(String),
    #[error("node {0} has no outgoing edge")]
    MissingEdges(String),
    #[error("node {0} has more than one outgoing route")]
    ConflictingEdges(String),
    #[error("conditional edges from {0} declare no branches")]
    EmptyBranches(String),
    #[error("conditional edges from {node} read unknown state field {field}")]
    UnknownStateField { node: String, field: String },
    #[error("no terminal is reachable from entry node {0}")]
    UnreachableTerminal(String),
}

/// How the next node is chosen after a node completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<K> {
    Static(Target<K>),
    Conditional {
        field: String,
        branches: BTreeMap<String, Target<K>>,
    },
}

impl<K> Route<K> {
    fn targets(&self) -> Vec<&Target<K>> {
        match self {
            Route::Static(target) => vec![target],
            Route::Conditional { branches, .. } => branches.values().collect(),
        }
    }
}

/// Builder for constructing workflow graphs with fluent API.
pub struct WorkflowGraph<S: WorkflowState, K: NodeKey> {
    name: String,
    nodes: BTreeMap<K, BoxedNode<S, K>>,
    routes: Vec<(K, Route<K>)>,
    entry_point: Option<K>,
    gates: BTreeSet<K>,
    deferred: Option<WorkflowBuildError>,
}

impl<S: WorkflowState, K: NodeKey> Default for WorkflowGraph<S, K> {
    fn default() -> Self {
        Self {
            name: String::new(),
            nodes: BTreeMap::new(),
            routes: Vec::new(),
            entry_point: None,
            gates: BTreeSet::new(),
            deferred: None,
        }
    }
}

impl<S: WorkflowState, K: NodeKey> WorkflowGraph<S, K> {
    /// Create a new workflow graph builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the workflow name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register a node under its own key.
    pub fn node(mut self, node: impl Node<S, K> + 'static) -> Self {
        let key = node.key();
        if self.nodes.insert(key.clone(), Arc::new(node)).is_some() {
            self.defer(WorkflowBuildError::DuplicateNode(key.to_string()));
        }
        self
    }

    /// Set the entry point node.
    pub fn entry(mut self, key: K) -> Self {
        if let Some(existing) = &self.entry_point {
            if *existing != key {
                let err = WorkflowBuildError::DuplicateEntry(existing.to_string(), key.to_string());
                self.defer(err);
            }
            return self;
        }
        self.entry_point = Some(key);
        self
    }

    /// Add an unconditional edge.
    pub fn edge(mut self, from: K, to: Target<K>) -> Self {
        self.routes.push((from, Route::Static(to)));
        self
    }

    /// Add a conditional edge-group keyed by the value of a state field
    /// after the node's update has been merged.
    pub fn conditional_edges<I, V>(mut self, from: K, field: impl Into<String>, branches: I) -> Self
    where
        I: IntoIterator<Item = (V, Target<K>)>,
        V: Into<String>,
    {
        let branches = branches
            .into_iter()
            .map(|(value, target)| (value.into(), target))
            .collect();
        self.routes.push((
            from,
            Route::Conditional {
                field: field.into(),
                branches,
            },
        ));
        self
    }

    /// Mark a node as an interrupt gate: execution pauses before it runs.
    pub fn interrupt(mut self, key: K) -> Self {
        self.gates.insert(key);
        self
    }

    fn defer(&mut self, err: WorkflowBuildError) {
        self.deferred.get_or_insert(err);
    }

    /// Validate and build the workflow graph.
    pub fn build(self) -> Result<CompiledGraph<S, K>, WorkflowBuildError> {
        if let Some(err) = self.deferred {
            return Err(err);
        }

        let entry_point = self.entry_point.ok_or(WorkflowBuildError::NoEntryPoint)?;
        if !self.nodes.contains_key(&entry_point) {
            return Err(WorkflowBuildError::UnknownNode(entry_point.to_string()));
        }

        for gate in &self.gates {
            if !self.nodes.contains_key(gate) {
                return Err(WorkflowBuildError::UnknownNode(gate.to_string()));
            }
        }

        let mut routes: BTreeMap<K, Route<K>> = BTreeMap::new();
        for (from, route) in self.routes {
            if !self.nodes.contains_key(&from) {
                return Err(WorkflowBuildError::UnknownNode(from.to_string()));
            }
            if let Route::Conditional { field, branches } = &route {
                if branches.is_empty() {
                    return Err(WorkflowBuildError::EmptyBranches(from.to_string()));
                }
                if S::reducer_for(field).is_none() {
                    return Err(WorkflowBuildError::UnknownStateField {
                        node: from.to_string(),
                        field: field.clone(),
                    });
                }
            }
            for target in route.targets() {
                if let Target::Node(to) = target {
                    if !self.nodes.contains_key(to) {
                        return Err(WorkflowBuildError::UnknownNode(to.to_string()));
                    }
                }
            }
            if routes.insert(from.clone(), route).is_some() {
                return Err(WorkflowBuildError::ConflictingEdges(from.to_string()));
            }
        }

        if let Some(missing) = self.nodes.keys().find(|key| !routes.contains_key(*key)) {
            return Err(WorkflowBuildError::MissingEdges(missing.to_string()));
        }

        if !terminal_reachable(&entry_point, &routes) {
            return Err(WorkflowBuildError::UnreachableTerminal(entry_point.to_string()));
        }

        Ok(CompiledGraph {
            name: self.name,
            nodes: self.nodes,
            routes,
            entry_point,
            gates: self.gates,
        })
    }
}

fn terminal_reachable<K: NodeKey>(entry: &K, routes: &BTreeMap<K, Route<K>>) -> bool {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([entry.clone()]);
    while let Some(key) = queue.pop_front() {
        if !seen.insert(key.clone()) {
            continue;
        }
        let Some(route) = routes.get(&key) else { continue };
        for target in route.targets() {
            match target {
                Target::End => return true,
                Target::Node(next) => queue.push_back(next.clone()),
            }
        }
    }
    false
}

/// A validated graph, ready to be driven by the executor.
pub struct CompiledGraph<S: WorkflowState, K: NodeKey> {
    name: String,
    nodes: BTreeMap<K, BoxedNode<S, K>>,
    routes: BTreeMap<K, Route<K>>,
    entry_point: K,
    gates: BTreeSet<K>,
}

impl<S: WorkflowState, K: NodeKey> CompiledGraph<S, K> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &K {
        &self.entry_point
    }

    pub fn node(&self, key: &K) -> Option<&BoxedNode<S, K>> {
        self.nodes.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    pub fn route(&self, key: &K) -> Option<&Route<K>> {
        self.routes.get(key)
    }

    pub fn is_gate(&self, key: &K) -> bool {
        self.gates.contains(key)
    }

    /// Resolve the node that follows `from`, reading conditional routing
    /// values from the already-merged `state`.
    pub fn resolve(&self, from: &K, state: &S) -> Result<Target<K>, NodeError> {
        let route = self
            .routes
            .get(from)
            .ok_or_else(|| NodeError::validation(format!("node {from} has no outgoing route")))?;

        match route {
            Route::Static(target) => Ok(target.clone()),
            Route::Conditional { field, branches } => {
                let value = match state.field(field) {
                    Some(serde_json::Value::String(value)) => value,
                    Some(serde_json::Value::Null) | None => {
                        return Err(NodeError::malformed(format!(
                            "no routing value in `{field}` after {from}"
                        )))
                    }
                    Some(other) => other.to_string(),
                };
                branches.get(&value).cloned().ok_or_else(|| {
                    let declared: Vec<&str> = branches.keys().map(String::as_str).collect();
                    NodeError::malformed(format!(
                        "`{value}` is not a declared route from {from} (expected one of: {})",
                        declared.join(", ")
                    ))
                })
            }
        }
    }

    /// Render the graph as a Mermaid flowchart.
    pub fn describe(&self) -> String {
        let mut out = String::from("flowchart TD\n");
        let _ = writeln!(out, "    START([start]) --> {}", self.entry_point);
        for key in self.nodes.keys() {
            if self.is_gate(key) {
                let _ = writeln!(out, "    {key}{{{{{key}}}}}");
            }
        }
        for (from, route) in &self.routes {
            match route {
                Route::Static(target) => {
                    let _ = writeln!(out, "    {from} --> {}", mermaid_target(target));
                }
                Route::Conditional { field, branches } => {
                    for (value, target) in branches {
                        let _ = writeln!(
                            out,
                            "    {from} -->|{field}={value}| {}",
                            mermaid_target(target)
                        );
                    }
                }
            }
        }
        out
    }
}

fn mermaid_target<K: NodeKey>(target: &Target<K>) -> String {
    match target {
        Target::Node(key) => key.to_string(),
        Target::End => "END([end])".to_string(),
    }
}

//! Node contract
//!
//! A node takes the current state and returns a partial update. It never
//! writes to the state or the checkpoint store itself.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{ErrorOrigin, NodeError};
use crate::state::WorkflowState;

/// Key type naming graph nodes, normally a closed enum.
pub trait NodeKey:
    Clone + Eq + Hash + Ord + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> NodeKey for T where
    T: Clone + Eq + Hash + Ord + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Where an edge leads: another node or the terminal marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target<K> {
    Node(K),
    End,
}

impl<K> Target<K> {
    pub fn is_end(&self) -> bool {
        matches!(self, Target::End)
    }

    pub fn node(&self) -> Option<&K> {
        match self {
            Target::Node(key) => Some(key),
            Target::End => None,
        }
    }
}

impl<K: Display> Display for Target<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Node(key) => key.fmt(f),
            Target::End => f.write_str(super::END),
        }
    }
}

/// Read-only view a node runs against.
#[derive(Debug)]
pub struct NodeContext<'a, S, K> {
    pub session_id: &'a str,
    /// Checkpoint step the state was read from
    pub step: usize,
    pub node: &'a K,
    pub state: &'a S,
}

/// A unit of work in the graph.
#[async_trait]
pub trait Node<S, K>: Send + Sync
where
    S: WorkflowState,
    K: NodeKey,
{
    /// Key this node is registered under.
    fn key(&self) -> K;

    /// Origin attributed to failures raised by this node.
    fn origin(&self) -> ErrorOrigin;

    /// Compute a partial update from the current state.
    async fn run(&self, ctx: NodeContext<'_, S, K>) -> Result<S::Update, NodeError>;
}

pub type BoxedNode<S, K> = Arc<dyn Node<S, K>>;

type UpdateFn<S> =
    dyn Fn(&S) -> Result<<S as WorkflowState>::Update, NodeError> + Send + Sync;

/// Node backed by a synchronous closure. Handy for glue steps and tests.
pub struct FnNode<S: WorkflowState, K> {
    key: K,
    origin: ErrorOrigin,
    compute: Box<UpdateFn<S>>,
}

impl<S: WorkflowState, K> FnNode<S, K> {
    pub fn new<F>(key: K, origin: ErrorOrigin, compute: F) -> Self
    where
        F: Fn(&S) -> Result<S::Update, NodeError> + Send + Sync + 'static,
    {
        Self {
            key,
            origin,
            compute: Box::new(compute),
        }
    }
}

#[async_trait]
impl<S, K> Node<S, K> for FnNode<S, K>
where
    S: WorkflowState,
    K: NodeKey,
{
    fn key(&self) -> K {
        self.key.clone()
    }

    fn origin(&self) -> ErrorOrigin {
        self.origin
    }

    async fn run(&self, ctx: NodeContext<'_, S, K>) -> Result<S::Update, NodeError> {
        (self.compute)(ctx.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        assert_eq!(Target::Node("planner").to_string(), "planner");
        assert_eq!(Target::<&str>::End.to_string(), "END");
        assert!(Target::<&str>::End.is_end());
        assert_eq!(Target::Node("x").node(), Some(&"x"));
    }

    #[test]
    fn test_target_serde() {
        let json = serde_json::to_string(&Target::Node("reflect".to_string())).unwrap();
        assert_eq!(json, r#"{"node":"reflect"}"#);
        let end: Target<String> = serde_json::from_str(r#""end""#).unwrap();
        assert_eq!(end, Target::End);
    }
}

//! Graph definition: nodes, static and conditional edges, interrupt gates.

mod graph;
mod node;

pub use graph::{CompiledGraph, Route, WorkflowBuildError, WorkflowGraph};
pub use node::{BoxedNode, FnNode, Node, NodeContext, NodeKey, Target};

/// Name used for the terminal marker in events and diagrams.
pub const END: &str = "END";

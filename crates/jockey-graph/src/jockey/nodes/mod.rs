//! Node implementations of the agent graph.

mod ask_human;
mod planner;
mod reflect;
mod supervisor;
mod worker;

pub use ask_human::AskHumanNode;
pub use planner::PlannerNode;
pub use reflect::ReflectNode;
pub use supervisor::SupervisorNode;
pub use worker::WorkerNode;

use super::{JockeyNode, UnknownNode};
use crate::error::NodeError;

/// A decision output that passed the allowed-set check but names no node.
fn parse_choice(choice: &str) -> Result<JockeyNode, NodeError> {
    choice
        .parse()
        .map_err(|e: UnknownNode| NodeError::malformed(e.to_string()))
}

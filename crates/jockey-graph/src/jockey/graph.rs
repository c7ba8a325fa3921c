use std::sync::Arc;

use super::nodes::{AskHumanNode, PlannerNode, ReflectNode, SupervisorNode, WorkerNode};
use super::{JockeyNode, SessionState, WorkerSpec};
use crate::artifacts::ArtifactStore;
use crate::llm::DecisionService;
use crate::tools::ToolExecutor;
use crate::workflow::{CompiledGraph, Target, WorkflowBuildError, WorkflowGraph};

/// Services the agent nodes call out to.
#[derive(Clone)]
pub struct JockeyDeps {
    pub decisions: Arc<dyn DecisionService>,
    pub tools: Arc<dyn ToolExecutor>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

#[derive(Debug, Clone)]
pub struct JockeyOptions {
    /// Pause for human review after every worker step.
    pub review: bool,
    pub workers: Vec<WorkerSpec>,
}

impl Default for JockeyOptions {
    fn default() -> Self {
        Self {
            review: false,
            workers: WorkerSpec::defaults(),
        }
    }
}

impl JockeyOptions {
    pub fn with_review(mut self, review: bool) -> Self {
        self.review = review;
        self
    }
}

fn branch(node: JockeyNode) -> (&'static str, Target<JockeyNode>) {
    (node.as_str(), Target::Node(node))
}

/// Wire the agent graph.
///
/// ```text
/// supervisor --next_node--> planner | reflect
/// planner    --next_node--> <worker> | reflect
/// <worker>   --next_node--> reflect | ask-human
/// ask-human  --next_node--> any other node        (interrupt gate)
/// reflect    ------------> END
/// ```
pub fn build_jockey_graph(
    deps: JockeyDeps,
    options: JockeyOptions,
) -> Result<CompiledGraph<SessionState, JockeyNode>, WorkflowBuildError> {
    let worker_keys: Vec<JockeyNode> = options.workers.iter().map(|w| w.node).collect();

    let mut graph = WorkflowGraph::new()
        .name("jockey")
        .node(SupervisorNode::new(deps.decisions.clone()))
        .node(PlannerNode::new(deps.decisions.clone(), options.workers.clone()))
        .node(ReflectNode::new(deps.decisions.clone()))
        .node(AskHumanNode::new(deps.decisions.clone()))
        .entry(JockeyNode::Supervisor)
        .conditional_edges(
            JockeyNode::Supervisor,
            "next_node",
            [branch(JockeyNode::Planner), branch(JockeyNode::Reflect)],
        )
        .conditional_edges(
            JockeyNode::Planner,
            "next_node",
            worker_keys
                .iter()
                .copied()
                .chain([JockeyNode::Reflect])
                .map(branch)
                .collect::<Vec<_>>(),
        )
        .edge(JockeyNode::Reflect, Target::End)
        .conditional_edges(
            JockeyNode::AskHuman,
            "next_node",
            [JockeyNode::Supervisor, JockeyNode::Planner, JockeyNode::Reflect]
                .into_iter()
                .chain(worker_keys.iter().copied())
                .map(branch)
                .collect::<Vec<_>>(),
        )
        .interrupt(JockeyNode::AskHuman);

    for spec in options.workers {
        let key = spec.node;
        graph = graph
            .node(
                WorkerNode::new(
                    spec,
                    deps.decisions.clone(),
                    deps.tools.clone(),
                    deps.artifacts.clone(),
                )
                .with_review(options.review),
            )
            .conditional_edges(
                key,
                "next_node",
                [branch(JockeyNode::Reflect), branch(JockeyNode::AskHuman)],
            );
    }

    graph.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MemoryArtifactStore;
    use crate::llm::ScriptedDecisionService;
    use crate::tools::ScriptedToolExecutor;
    use crate::workflow::Route;

    fn deps() -> JockeyDeps {
        JockeyDeps {
            decisions: Arc::new(ScriptedDecisionService::new()),
            tools: Arc::new(ScriptedToolExecutor::new()),
            artifacts: Arc::new(MemoryArtifactStore::new()),
        }
    }

    #[test]
    fn test_graph_shape() {
        let graph = build_jockey_graph(deps(), JockeyOptions::default()).unwrap();
        assert_eq!(graph.name(), "jockey");
        assert_eq!(*graph.entry(), JockeyNode::Supervisor);
        assert_eq!(graph.keys().count(), JockeyNode::ALL.len());
        assert!(graph.is_gate(&JockeyNode::AskHuman));
        assert!(!graph.is_gate(&JockeyNode::VideoSearch));
        assert_eq!(
            graph.route(&JockeyNode::Reflect),
            Some(&Route::Static(Target::End))
        );

        let Some(Route::Conditional { field, branches }) = graph.route(&JockeyNode::Planner) else {
            panic!("planner must route conditionally");
        };
        assert_eq!(field, "next_node");
        assert_eq!(branches.len(), 4);
        assert_eq!(
            branches.get("video-editing"),
            Some(&Target::Node(JockeyNode::VideoEditing))
        );
    }

    #[test]
    fn test_ask_human_reaches_every_other_node() {
        let graph = build_jockey_graph(deps(), JockeyOptions::default()).unwrap();
        let Some(Route::Conditional { branches, .. }) = graph.route(&JockeyNode::AskHuman) else {
            panic!("ask-human must route conditionally");
        };
        let expected: Vec<&str> = JockeyNode::ALL
            .iter()
            .filter(|node| **node != JockeyNode::AskHuman)
            .map(JockeyNode::as_str)
            .collect();
        let mut declared: Vec<&str> = branches.keys().map(String::as_str).collect();
        declared.sort();
        let mut expected = expected;
        expected.sort();
        assert_eq!(declared, expected);
    }

    #[test]
    fn test_describe_renders_gate() {
        let graph = build_jockey_graph(deps(), JockeyOptions::default()).unwrap();
        let diagram = graph.describe();
        assert!(diagram.contains("START([start]) --> supervisor"));
        assert!(diagram.contains("reflect --> END"));
        assert!(diagram.contains("ask-human{{ask-human}}"));
    }
}

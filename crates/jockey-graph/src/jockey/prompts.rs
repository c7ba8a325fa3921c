//! Instructions handed to the decision service and the context rendered
//! from session state.

use std::fmt::Write as _;

use super::{SessionState, WorkerSpec};

/// Decision purposes, used by the service (and test scripts) to tell
/// requests apart.
pub mod purpose {
    pub const ROUTE: &str = "route";
    pub const PLAN: &str = "plan";
    pub const NEXT_STEP: &str = "next-step";
    pub const SELECT_RESULTS: &str = "select-results";
    pub const TOOL_ARGUMENTS: &str = "tool-arguments";
    pub const SUMMARY: &str = "summary";
    pub const FEEDBACK_ROUTE: &str = "feedback-route";
}

/// System preamble for the language model behind the decision service.
pub const PREAMBLE: &str = "You are Jockey, a conversational agent that searches, \
describes and edits video. You work with a team of workers that call video tools on \
your behalf. Answer with exactly what is asked for and nothing else.";

pub const ROUTE: &str = "Decide whether the latest request needs a multi-step plan. \
Answer `planner` when videos must be searched, described or edited. Answer `reflect` \
when the conversation already holds everything needed to reply.";

pub const PLAN: &str = "Write a short numbered plan that fulfils the latest request \
using the workers listed below. One tool call per step.";

pub const NEXT_STEP: &str = "Given the plan and the work done so far, name the tool \
to call next. Answer `reflect` once the plan is complete or cannot continue.";

pub const SELECT_RESULTS: &str = "Some earlier tool calls produced search results. \
Return a JSON array with the keys of the result sets the next step should use, \
for example [\"call_1\"]. Return [] when none apply.";

pub const REFLECT: &str = "Write the reply to the user: summarise what was done and \
present the results. If something failed, say what and suggest how to proceed.";

pub const FEEDBACK_ROUTE: &str = "The user reviewed the last worker output. Decide \
which node should act on the feedback. The first option repeats the reviewed step.";

pub fn tool_arguments(tool: &str) -> String {
    format!(
        "Derive the arguments for the `{tool}` tool from the plan and the selected \
         results. Answer with a single JSON object."
    )
}

/// The conversation so far, one line per message.
pub fn conversation(state: &SessionState) -> String {
    let mut out = String::new();
    for message in &state.history {
        let speaker = message.name.as_deref().unwrap_or("unknown");
        let _ = writeln!(out, "[{speaker}] {}", message.content);
    }
    out
}

pub fn workers(specs: &[WorkerSpec]) -> String {
    let mut out = String::new();
    for spec in specs {
        let _ = writeln!(
            out,
            "- {}: {} (tools: {})",
            spec.node,
            spec.description,
            spec.tools.join(", ")
        );
    }
    out
}

/// Conversation plus the active plan and the selected results.
pub fn working_context(state: &SessionState) -> String {
    let mut out = conversation(state);
    if let Some(plan) = &state.active_plan {
        let _ = write!(out, "\nPlan:\n{plan}\n");
    }
    let selected = state.selected_results();
    if !selected.is_empty() {
        out.push_str("\nSelected results:\n");
        for (key, records) in selected {
            let rendered = serde_json::to_string(records).unwrap_or_default();
            let _ = writeln!(out, "{key}: {rendered}");
        }
    }
    out
}

/// Keys and sizes of the cached result sets.
pub fn cached_result_sets(state: &SessionState) -> String {
    let mut out = String::new();
    for (key, records) in &state.result_cache {
        let videos: Vec<&str> = records.iter().map(|r| r.video_id.as_str()).collect();
        let _ = writeln!(out, "{key}: {} clips from {}", records.len(), videos.join(", "));
    }
    out
}

//! Session state of the video agent
//!
//! | field                  | reducer          |
//! |------------------------|------------------|
//! | `history`              | append-only (by message id) |
//! | `next_node`            | last-write-wins  |
//! | `plan_made`            | last-write-wins  |
//! | `active_plan`          | last-write-wins  |
//! | `pending_tool_call`    | last-write-wins  |
//! | `result_cache`         | keyed merge (by clip identity) |
//! | `selected_result_keys` | last-write-wins  |
//! | `feedback_log`         | fill-or-append   |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::JockeyNode;
use crate::error::{ClassifiedError, ErrorOrigin, StateError};
use crate::reducer::{self, FieldSpec, FieldUpdate, ReducerKind};
use crate::state::{StateUpdate, WorkflowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id; re-delivering a message with a known id is a no-op.
    pub id: String,
    pub role: Role,
    /// Speaker: a node name, `human` or `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

impl Message {
    fn new(role: Role, name: Option<&str>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            name: name.map(str::to_string),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Some("human"), content)
    }

    pub fn assistant(name: &str, content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(name), content)
    }

    pub fn tool(name: &str, content: impl Into<String>) -> Self {
        Self::new(Role::Tool, Some(name), content)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// A search hit: one clip of one video. Everything besides the clip
/// bounds is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub video_id: String,
    pub start: f64,
    pub end: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultRecord {
    pub fn new(video_id: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            video_id: video_id.into(),
            start,
            end,
            extra: Map::new(),
        }
    }

    /// Identity used for duplicate suppression in the cache.
    pub fn identity(&self) -> String {
        format!("{}_{:.3}-{:.3}", self.video_id, self.start, self.end)
    }

    /// Artifact key of the rendered clip.
    pub fn clip_file_name(&self) -> String {
        format!("{}.mp4", self.identity())
    }
}

/// Human review of one worker output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub origin_node: JockeyNode,
    pub origin_content: String,
    /// Empty while the review is open.
    pub human_feedback: String,
    /// Tool call the origin worker executed, restored on a revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<String>,
}

impl FeedbackEntry {
    pub fn is_open(&self) -> bool {
        self.human_feedback.trim().is_empty()
    }

    /// Whether `incoming` answers this (open) entry.
    fn filled_by(&self, incoming: &FeedbackEntry) -> bool {
        self.is_open()
            && self.origin_node == incoming.origin_node
            && self.origin_content == incoming.origin_content
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub history: Vec<Message>,
    pub next_node: Option<JockeyNode>,
    pub plan_made: bool,
    pub active_plan: Option<String>,
    pub pending_tool_call: Option<String>,
    pub result_cache: BTreeMap<String, Vec<ResultRecord>>,
    pub selected_result_keys: Vec<String>,
    pub feedback_log: Vec<FeedbackEntry>,
}

impl SessionState {
    /// The open review, if the latest feedback entry has not been answered.
    pub fn open_feedback(&self) -> Option<&FeedbackEntry> {
        self.feedback_log.last().filter(|entry| entry.is_open())
    }

    /// Patch answering the open review with `feedback`. An empty answer
    /// leaves the log unchanged, which sends the gate back to the origin.
    pub fn answer_feedback(&self, feedback: &str) -> Option<SessionUpdate> {
        let open = self.open_feedback()?;
        if feedback.trim().is_empty() {
            return Some(SessionUpdate::default());
        }
        Some(SessionUpdate {
            feedback_log: vec![FeedbackEntry {
                human_feedback: feedback.to_string(),
                ..open.clone()
            }],
            ..SessionUpdate::default()
        })
    }

    /// Records the planner selected from the cache, in selection order.
    pub fn selected_results(&self) -> Vec<(&str, &[ResultRecord])> {
        self.selected_result_keys
            .iter()
            .filter_map(|key| {
                self.result_cache
                    .get_key_value(key)
                    .map(|(k, v)| (k.as_str(), v.as_slice()))
            })
            .collect()
    }
}

/// Partial update of [`SessionState`]. Absent fields are left untouched;
/// `null` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Message>,

    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub next_node: FieldUpdate<JockeyNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_made: Option<bool>,

    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub active_plan: FieldUpdate<String>,

    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub pending_tool_call: FieldUpdate<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub result_cache: BTreeMap<String, Vec<ResultRecord>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_result_keys: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback_log: Vec<FeedbackEntry>,
}

impl SessionUpdate {
    /// A user turn.
    pub fn user_input(content: impl Into<String>) -> Self {
        Self {
            history: vec![Message::user(content)],
            ..Self::default()
        }
    }
}

impl StateUpdate for SessionUpdate {
    fn empty() -> Self {
        Self::default()
    }

    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl WorkflowState for SessionState {
    type Update = SessionUpdate;

    fn schema() -> &'static [FieldSpec] {
        const SCHEMA: &[FieldSpec] = &[
            FieldSpec::new("history", ReducerKind::AppendOnly),
            FieldSpec::new("next_node", ReducerKind::LastWriteWins),
            FieldSpec::new("plan_made", ReducerKind::LastWriteWins),
            FieldSpec::new("active_plan", ReducerKind::LastWriteWins),
            FieldSpec::new("pending_tool_call", ReducerKind::LastWriteWins),
            FieldSpec::new("result_cache", ReducerKind::KeyedMerge),
            FieldSpec::new("selected_result_keys", ReducerKind::LastWriteWins),
            FieldSpec::new("feedback_log", ReducerKind::FillOrAppend),
        ];
        SCHEMA
    }

    fn apply_update(&self, update: SessionUpdate) -> Result<Self, StateError> {
        let merged = Self {
            history: reducer::append_only(&self.history, &update.history, |m| m.id.clone()),
            next_node: reducer::last_write_wins_nullable(&self.next_node, &update.next_node),
            plan_made: reducer::last_write_wins(&self.plan_made, update.plan_made.as_ref()),
            active_plan: reducer::last_write_wins_nullable(&self.active_plan, &update.active_plan),
            pending_tool_call: reducer::last_write_wins_nullable(
                &self.pending_tool_call,
                &update.pending_tool_call,
            ),
            result_cache: reducer::keyed_merge(
                &self.result_cache,
                &update.result_cache,
                ResultRecord::identity,
            ),
            selected_result_keys: reducer::last_write_wins(
                &self.selected_result_keys,
                update.selected_result_keys.as_ref(),
            ),
            feedback_log: reducer::fill_or_append(
                &self.feedback_log,
                &update.feedback_log,
                FeedbackEntry::filled_by,
            ),
        };

        if merged.active_plan.is_some() && !merged.plan_made {
            return Err(StateError::Invariant(
                "active_plan is set but plan_made is false".into(),
            ));
        }
        Ok(merged)
    }

    /// Record the failure in the conversation and hand over to the
    /// reflector, which explains it to the user.
    fn failure_update(&self, error: &ClassifiedError) -> Option<SessionUpdate> {
        let next_node = if error.origin == ErrorOrigin::Reflector {
            FieldUpdate::Clear
        } else {
            FieldUpdate::Set(JockeyNode::Reflect)
        };
        Some(SessionUpdate {
            history: vec![Message::assistant("error", error.to_string())],
            next_node,
            pending_tool_call: FieldUpdate::Clear,
            ..SessionUpdate::default()
        })
    }
}

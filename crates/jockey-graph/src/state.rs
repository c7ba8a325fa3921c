//! Workflow state abstraction
//!
//! A session threads one state value through every node. Nodes never
//! mutate it; they return a partial update which the executor merges with
//! [`WorkflowState::apply_update`] before persisting a checkpoint.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClassifiedError, StateError};
use crate::reducer::{FieldSpec, ReducerKind};

/// A partial state update produced by a node or supplied by a caller.
pub trait StateUpdate: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// An update that changes nothing.
    fn empty() -> Self;

    /// Whether merging this update would leave every field untouched.
    fn is_empty(&self) -> bool;
}

/// State threaded through one session.
///
/// # Example
///
/// ```ignore
/// impl WorkflowState for ChatState {
///     type Update = ChatUpdate;
///
///     fn schema() -> &'static [FieldSpec] {
///         &[FieldSpec::new("messages", ReducerKind::AppendOnly)]
///     }
///
///     fn apply_update(&self, update: ChatUpdate) -> Result<Self, StateError> {
///         Ok(Self {
///             messages: reducer::append_only(&self.messages, &update.messages, |m| m.id.clone()),
///         })
///     }
/// }
/// ```
pub trait WorkflowState:
    Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The update type produced by nodes
    type Update: StateUpdate;

    /// Field names and the reducer each one merges with.
    fn schema() -> &'static [FieldSpec];

    /// Merge an update into a new state.
    ///
    /// Must be pure and idempotent. Returns an error when the merged state
    /// would break an invariant; the update is then discarded.
    fn apply_update(&self, update: Self::Update) -> Result<Self, StateError>;

    /// Update merged in place of a failed node's output when the error
    /// policy is report-and-continue. `None` makes the failure halt.
    fn failure_update(&self, _error: &ClassifiedError) -> Option<Self::Update> {
        None
    }

    /// Reducer declared for a field, if the field exists.
    fn reducer_for(name: &str) -> Option<ReducerKind> {
        Self::schema()
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.reducer)
    }

    /// Read a top-level field as JSON. Used by conditional routing.
    fn field(&self, name: &str) -> Option<serde_json::Value> {
        let value = serde_json::to_value(self).ok()?;
        value.get(name).cloned()
    }

    /// Parse an external JSON patch, rejecting fields the schema does not
    /// declare.
    fn parse_update(patch: serde_json::Value) -> Result<Self::Update, StateError> {
        let object = patch.as_object().ok_or(StateError::NotAnObject)?;
        if let Some(unknown) = object.keys().find(|key| Self::reducer_for(key).is_none()) {
            return Err(StateError::UnknownField(unknown.clone()));
        }
        serde_json::from_value(patch).map_err(|e| StateError::Malformed(e.to_string()))
    }
}

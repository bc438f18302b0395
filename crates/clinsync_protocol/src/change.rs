//! Inbound change-stream messages.

use crate::operation::WriteAction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of change reported by the backend's notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A record was inserted.
    Insert,
    /// A record was updated.
    Update,
    /// A record was deleted.
    Delete,
}

impl ChangeKind {
    /// Maps the backend's change kind to the local write action.
    pub fn to_action(self) -> WriteAction {
        match self {
            ChangeKind::Insert => WriteAction::Create,
            ChangeKind::Update => WriteAction::Update,
            ChangeKind::Delete => WriteAction::Delete,
        }
    }
}

/// A single message from the backend change-notification channel.
///
/// `new_state` carries the post-write record for inserts and updates;
/// `old_state` carries the last known record for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    /// The kind of change.
    pub kind: ChangeKind,
    /// Post-write record state (inserts and updates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<Value>,
    /// Pre-write record state (updates and deletes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_state: Option<Value>,
}

impl ChangeMessage {
    /// Creates an insert message.
    pub fn insert(new_state: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new_state: Some(new_state),
            old_state: None,
        }
    }

    /// Creates an update message.
    pub fn update(new_state: Value, old_state: Option<Value>) -> Self {
        Self {
            kind: ChangeKind::Update,
            new_state: Some(new_state),
            old_state,
        }
    }

    /// Creates a delete message.
    pub fn delete(old_state: Option<Value>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new_state: None,
            old_state,
        }
    }

    /// Returns the authoritative record state for event delivery.
    ///
    /// The post-write state for inserts and updates, the last known state
    /// for deletes.
    pub fn record(&self) -> Value {
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                self.new_state.clone().unwrap_or(Value::Null)
            }
            ChangeKind::Delete => self.old_state.clone().unwrap_or(Value::Null),
        }
    }
}

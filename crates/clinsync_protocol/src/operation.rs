//! Pending write operations.

use crate::entity::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of a pending operation.
///
/// Generated at enqueue time and stable across retries.
pub type OperationId = Uuid;

/// The kind of write an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAction {
    /// Insert a new record.
    Create,
    /// Replace fields of an existing record.
    Update,
    /// Remove a record.
    Delete,
}

impl WriteAction {
    /// Returns the canonical action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteAction::Create => "create",
            WriteAction::Update => "update",
            WriteAction::Delete => "delete",
        }
    }
}

impl fmt::Display for WriteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local write intent, with per-action required fields.
///
/// `WriteRequest` is the shape accepted at the submit boundary. Updates
/// and deletes must name the target record; creates and updates must
/// carry an object payload. [`WriteRequest::validate`] enforces this
/// before an [`Operation`] is ever constructed, so a malformed submission
/// never enters the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Insert a new record.
    Create {
        /// The record to insert.
        payload: Value,
    },
    /// Update an existing record.
    Update {
        /// Key of the target record.
        key: String,
        /// Fields to write.
        payload: Value,
    },
    /// Delete an existing record.
    Delete {
        /// Key of the target record.
        key: String,
    },
}

impl WriteRequest {
    /// Returns the action this request performs.
    pub fn action(&self) -> WriteAction {
        match self {
            WriteRequest::Create { .. } => WriteAction::Create,
            WriteRequest::Update { .. } => WriteAction::Update,
            WriteRequest::Delete { .. } => WriteAction::Delete,
        }
    }

    /// Validates the per-action required fields.
    ///
    /// # Errors
    ///
    /// Returns an error if a create/update payload is not a JSON object,
    /// or if an update/delete key is empty.
    pub fn validate(&self) -> Result<(), InvalidWrite> {
        match self {
            WriteRequest::Create { payload } => {
                if !payload.is_object() {
                    return Err(InvalidWrite::PayloadNotObject);
                }
            }
            WriteRequest::Update { key, payload } => {
                if key.is_empty() {
                    return Err(InvalidWrite::EmptyKey);
                }
                if !payload.is_object() {
                    return Err(InvalidWrite::PayloadNotObject);
                }
            }
            WriteRequest::Delete { key } => {
                if key.is_empty() {
                    return Err(InvalidWrite::EmptyKey);
                }
            }
        }
        Ok(())
    }
}

/// Reason a write request was rejected at the submit boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidWrite {
    /// The payload of a create or update was not a JSON object.
    #[error("payload must be a JSON object")]
    PayloadNotObject,
    /// The target record key of an update or delete was empty.
    #[error("record key must not be empty")]
    EmptyKey,
}

/// Lifecycle status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationStatus {
    /// Waiting in the queue, eligible for the next drain.
    Queued,
    /// Currently being executed against the backend.
    InFlight,
    /// Failed at least once; a retry is scheduled or pending connectivity.
    Failed,
    /// Retry budget exhausted; parked in the dead-letter list.
    Dead,
}

/// A single pending write awaiting execution against the backend.
///
/// # Invariants
///
/// - `id` is unique within the queue and within the dead-letter list
/// - `retry_count` is monotonically non-decreasing for a given `id`
/// - an operation with `status = Dead` is never re-enqueued automatically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique operation ID, stable across retries.
    pub id: OperationId,
    /// The collection being written.
    pub entity: EntityKind,
    /// The kind of write.
    pub action: WriteAction,
    /// Key of the target record (updates and deletes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// The record fields to write. `Null` for deletes.
    pub payload: Value,
    /// Enqueue time, epoch milliseconds.
    pub enqueued_at: u64,
    /// Number of retries scheduled so far. Incremented only by the
    /// retry scheduler.
    pub retry_count: u32,
    /// Earliest next attempt, epoch milliseconds. Absent means eligible
    /// for immediate execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<u64>,
    /// Current lifecycle status.
    pub status: OperationStatus,
}

impl Operation {
    /// Builds an operation from a validated write request.
    ///
    /// Assigns a fresh id; the request should have passed
    /// [`WriteRequest::validate`] first.
    pub fn from_request(entity: EntityKind, request: WriteRequest, enqueued_at: u64) -> Self {
        let action = request.action();
        let (key, payload) = match request {
            WriteRequest::Create { payload } => (None, payload),
            WriteRequest::Update { key, payload } => (Some(key), payload),
            WriteRequest::Delete { key } => (Some(key), Value::Null),
        };

        Self {
            id: Uuid::new_v4(),
            entity,
            action,
            key,
            payload,
            enqueued_at,
            retry_count: 0,
            next_retry_at: None,
            status: OperationStatus::Queued,
        }
    }

    /// Returns the target record key, if the action has one.
    pub fn target_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Returns a copy with the payload replaced.
    ///
    /// Used by conflict resolution; id, retry bookkeeping, and status are
    /// preserved.
    pub fn with_payload(&self, payload: Value) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }
}

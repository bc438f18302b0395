//! Out-of-band notifications about queue health and conflicts.

use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A notification raised by the sync engine outside the event stream.
///
/// Notifications signal conditions a UI or operator should see but that
/// are not record changes: capacity eviction, dead-lettering, and
/// conflicts awaiting a manual decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncNotification {
    /// The queue was at capacity and the oldest operation was evicted to
    /// make room for a new one.
    QueueOverflow {
        /// The evicted operation.
        evicted: Operation,
    },
    /// An operation exhausted its retry budget and was moved to the
    /// dead-letter list.
    OperationDeadLettered {
        /// The dead-lettered operation.
        operation: Operation,
    },
    /// A conflicting write under the manual strategy awaits an external
    /// decision. The operation is paused, not re-enqueued.
    ConflictPending {
        /// The local operation that was rejected.
        operation: Operation,
        /// The backend's current record state.
        remote: Value,
    },
}

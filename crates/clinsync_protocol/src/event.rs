//! Sync events delivered to local consumers.

use crate::entity::EntityKind;
use crate::operation::{OperationId, WriteAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a sync event reached the local process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// Delivered via an active change-stream subscription, or produced by
    /// a write that succeeded on its immediate attempt.
    Live,
    /// Produced by a self-originated write applied through the degraded
    /// queue-drain path.
    Fallback,
}

/// A notification delivered to local consumers.
///
/// Events are ephemeral: constructed, dispatched to every listener
/// registered for `entity`, and discarded. `data` is the authoritative
/// post-write state. Ordering is guaranteed per entity kind only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// The collection this event concerns.
    pub entity: EntityKind,
    /// The write that produced the event.
    pub action: WriteAction,
    /// Authoritative post-write record state.
    pub data: Value,
    /// Originating operation, when the event stems from a local write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    /// Delivery time, epoch milliseconds.
    pub timestamp: u64,
    /// Delivery path.
    pub origin: EventOrigin,
    /// Connectivity state at delivery time.
    pub connected: bool,
}

impl SyncEvent {
    /// Creates an event delivered via the live path.
    pub fn live(
        entity: EntityKind,
        action: WriteAction,
        data: Value,
        operation_id: Option<OperationId>,
        timestamp: u64,
        connected: bool,
    ) -> Self {
        Self {
            entity,
            action,
            data,
            operation_id,
            timestamp,
            origin: EventOrigin::Live,
            connected,
        }
    }

    /// Creates an event for a self-originated write applied via the
    /// fallback (queue-drain) path.
    pub fn fallback(
        entity: EntityKind,
        action: WriteAction,
        data: Value,
        operation_id: OperationId,
        timestamp: u64,
        connected: bool,
    ) -> Self {
        Self {
            entity,
            action,
            data,
            operation_id: Some(operation_id),
            timestamp,
            origin: EventOrigin::Fallback,
            connected,
        }
    }
}

//! Conflict detection outcomes and resolution strategies.

use clinsync_protocol::Operation;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Field carrying the record's last-modified timestamp.
const UPDATED_AT: &str = "updatedAt";

/// Strategy applied when a write is rejected as conflicting.
///
/// A single strategy is active at a time; there is no per-operation
/// override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Retry the write with the original local payload unchanged.
    LastWriteWins,
    /// Overlay local fields onto the remote record, keeping the greater
    /// `updatedAt`.
    Merge,
    /// Do not retry; surface the conflict and wait for an external
    /// decision.
    Manual,
}

impl ConflictStrategy {
    /// Returns the canonical strategy name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last-write-wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Manual => "manual",
        }
    }

    /// Returns true if this strategy resolves conflicts without an
    /// external decision.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictStrategy::Manual)
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown conflict strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for ConflictStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-write-wins" => Ok(ConflictStrategy::LastWriteWins),
            "merge" => Ok(ConflictStrategy::Merge),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Applies the configured strategy to conflict-rejected writes.
pub struct ConflictResolver {
    strategy: RwLock<ConflictStrategy>,
}

impl ConflictResolver {
    /// Creates a resolver with the given strategy.
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy: RwLock::new(strategy),
        }
    }

    /// Returns the active strategy.
    pub fn strategy(&self) -> ConflictStrategy {
        *self.strategy.read()
    }

    /// Replaces the active strategy.
    pub fn set_strategy(&self, strategy: ConflictStrategy) {
        *self.strategy.write() = strategy;
    }

    /// Decides the outcome for a conflicting operation.
    ///
    /// Returns the operation to re-attempt, or `None` under the manual
    /// strategy, meaning "paused, not re-enqueued automatically". If the
    /// resolved write fails, it re-enters the normal retry path rather
    /// than looping back here.
    pub fn resolve(&self, op: &Operation, remote: &Value) -> Option<Operation> {
        match self.strategy() {
            ConflictStrategy::LastWriteWins => Some(op.clone()),
            ConflictStrategy::Merge => Some(op.with_payload(merge_records(&op.payload, remote))),
            ConflictStrategy::Manual => None,
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictStrategy::LastWriteWins)
    }
}

/// Merges a conflicting local payload with the backend's current record.
///
/// The output starts from the remote record and overlays every field
/// present in the local payload; the effective `updatedAt` is the
/// greater of the two values.
pub fn merge_records(local: &Value, remote: &Value) -> Value {
    let mut merged: Map<String, Value> = remote.as_object().cloned().unwrap_or_default();

    if let Some(local_fields) = local.as_object() {
        for (field, value) in local_fields {
            merged.insert(field.clone(), value.clone());
        }
    }

    let local_updated = local.get(UPDATED_AT);
    let remote_updated = remote.get(UPDATED_AT);
    if let Some(winner) = newer_timestamp(local_updated, remote_updated) {
        merged.insert(UPDATED_AT.to_string(), winner);
    }

    Value::Object(merged)
}

/// Picks the greater of two `updatedAt` values.
///
/// Numbers compare numerically; strings (ISO-8601 dates) compare
/// lexicographically. With only one side present, that side wins.
fn newer_timestamp(local: Option<&Value>, remote: Option<&Value>) -> Option<Value> {
    match (local, remote) {
        (Some(l), Some(r)) => {
            let pick_local = match (l.as_f64(), r.as_f64()) {
                (Some(ln), Some(rn)) => ln >= rn,
                _ => match (l.as_str(), r.as_str()) {
                    (Some(ls), Some(rs)) => ls >= rs,
                    _ => true,
                },
            };
            Some(if pick_local { l.clone() } else { r.clone() })
        }
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (None, None) => None,
    }
}

//! # clinsync Protocol
//!
//! Data model and wire types for the clinsync engine.
//!
//! This crate provides:
//! - `EntityKind` for the tracked clinic collections
//! - `Operation` and `WriteRequest` for pending local writes
//! - `ChangeMessage` for inbound change-stream messages
//! - `SyncEvent` for notifications delivered to local consumers
//! - `SyncNotification` for out-of-band queue and conflict signals
//!
//! This is a pure data-model crate with no I/O operations. All types
//! serialize with serde; the persisted queue representation is the JSON
//! form of [`Operation`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod entity;
mod event;
mod notification;
mod operation;

pub use change::{ChangeKind, ChangeMessage};
pub use entity::{EntityKind, UnknownEntity};
pub use event::{EventOrigin, SyncEvent};
pub use notification::SyncNotification;
pub use operation::{
    InvalidWrite, Operation, OperationId, OperationStatus, WriteAction, WriteRequest,
};

//! # clinsync Engine
//!
//! Real-time synchronization and offline-resilience engine.
//!
//! This crate provides:
//! - Connectivity tracking with edge-triggered transitions
//! - A bounded, persisted queue of pending write operations
//! - Retry scheduling with exponential backoff and a dead-letter path
//! - Configurable conflict resolution
//! - Per-entity change-stream subscriptions with automatic re-subscribe
//! - An in-process listener registry with per-handler fault isolation
//! - Aggregate sync health tracking
//!
//! ## Architecture
//!
//! [`SyncCoordinator`] is the single entry point. Outbound, a local write
//! enters `submit`, is attempted immediately when the backend is
//! reachable, and otherwise lands in the [`OperationQueue`] until a drain
//! runs. Inbound, the backend's change stream is consumed by the
//! [`ChangeStreamSubscriber`] and fanned out through the
//! [`ListenerRegistry`].
//!
//! ## Key Invariants
//!
//! - Operations drain in FIFO enqueue order
//! - At most one execution attempt per operation is in flight at any
//!   instant; retry timers are cancelled before any other dequeue path
//! - A drain is exclusive; an overlapping call no-ops
//! - Per-entity event order follows backend emission order
//! - Dead-lettered operations are never retried automatically

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod clock;
mod config;
mod conflict;
mod connection;
mod coordinator;
mod error;
mod notify;
mod queue;
mod registry;
mod retry;
mod status;
mod subscriber;

pub use backend::{ChangeStream, MockBackend, MockChangeStream, WriteBackend, WriteResult};
pub use config::{RetryConfig, SyncConfig};
pub use conflict::{merge_records, ConflictResolver, ConflictStrategy, UnknownStrategy};
pub use connection::{ConnectionMonitor, Transition};
pub use coordinator::{DrainOutcome, SyncCoordinator};
pub use error::{SubmitError, SyncError, SyncResult, WriteError};
pub use notify::NotificationHub;
pub use queue::OperationQueue;
pub use registry::{ListenerRegistry, Subscription};
pub use retry::{RetryScheduler, TaskTimer};
pub use status::{SyncStateTracker, SyncStatus};
pub use subscriber::{ChangeStreamSubscriber, StreamState};

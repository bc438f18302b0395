//! Backend collaborator traits.
//!
//! The engine talks to the backend through two seams: [`WriteBackend`]
//! for the request/response write API and [`ChangeStream`] for the
//! change-notification channel. Both are traits so transports can vary
//! (HTTP, WebSocket, in-memory for tests).

use crate::error::{SyncError, WriteError};
use clinsync_protocol::{ChangeMessage, EntityKind, Operation};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// Outcome of a backend write attempt: the applied record, or a
/// classified failure.
pub type WriteResult = Result<Value, WriteError>;

/// The backend's request/response write API.
///
/// Implementations must report conflicts through the structured
/// [`WriteError::Conflict`] variant; the engine never pattern-matches
/// error text.
pub trait WriteBackend: Send + Sync {
    /// Executes one write, returning the applied record on success.
    fn execute(&self, operation: &Operation) -> WriteResult;

    /// Checks whether the backend currently answers requests.
    ///
    /// Probes must not panic; an unreachable backend simply returns
    /// false.
    fn probe(&self) -> bool;
}

/// The backend's change-notification channel.
pub trait ChangeStream: Send + Sync {
    /// Opens one logical subscription for an entity kind.
    ///
    /// The returned receiver yields messages in backend emission order.
    /// A disconnected receiver signals a subscription error; the
    /// subscriber re-opens after a delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established.
    fn open(&self, entity: EntityKind) -> Result<Receiver<ChangeMessage>, SyncError>;
}

/// A mock write backend for testing.
///
/// By default every write succeeds, echoing the operation payload as the
/// applied record. Failures and conflicts can be scripted; every
/// executed operation is recorded in order.
#[derive(Default)]
pub struct MockBackend {
    reachable: AtomicBool,
    executed: Mutex<Vec<Operation>>,
    scripted_failures: Mutex<VecDeque<WriteError>>,
    conflicts_by_key: Mutex<HashMap<String, Value>>,
}

impl MockBackend {
    /// Creates a reachable mock backend.
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            executed: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            conflicts_by_key: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the probe result and whether writes succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Queues failures returned by the next `execute` calls, before any
    /// keyed conflict is consulted.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = WriteError>) {
        self.scripted_failures.lock().extend(errors);
    }

    /// Arranges a one-shot conflict for the record with the given key,
    /// carrying `remote` as the backend's current state.
    pub fn conflict_once(&self, key: impl Into<String>, remote: Value) {
        self.conflicts_by_key.lock().insert(key.into(), remote);
    }

    /// Returns every executed operation, in execution order.
    pub fn executed(&self) -> Vec<Operation> {
        self.executed.lock().clone()
    }

    /// Returns the number of execute calls observed.
    pub fn execution_count(&self) -> usize {
        self.executed.lock().len()
    }
}

impl WriteBackend for MockBackend {
    fn execute(&self, operation: &Operation) -> WriteResult {
        self.executed.lock().push(operation.clone());

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(WriteError::Unavailable("backend not reachable".into()));
        }

        if let Some(err) = self.scripted_failures.lock().pop_front() {
            return Err(err);
        }

        if let Some(key) = operation.target_key() {
            if let Some(remote) = self.conflicts_by_key.lock().remove(key) {
                return Err(WriteError::Conflict { remote });
            }
        }

        match operation.target_key() {
            Some(key) if operation.payload.is_null() => Ok(json!({ "key": key })),
            _ => Ok(operation.payload.clone()),
        }
    }

    fn probe(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// A mock change stream for testing.
///
/// Each `open` creates a channel; tests push messages with
/// [`MockChangeStream::emit`] and simulate subscription errors with
/// [`MockChangeStream::disconnect`] or scripted open failures.
#[derive(Default)]
pub struct MockChangeStream {
    senders: Mutex<HashMap<EntityKind, Vec<Sender<ChangeMessage>>>>,
    failing_opens: Mutex<HashMap<EntityKind, u32>>,
    open_counts: Mutex<HashMap<EntityKind, u32>>,
}

impl MockChangeStream {
    /// Creates a new mock change stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` opens for `entity` fail.
    pub fn fail_opens(&self, entity: EntityKind, count: u32) {
        self.failing_opens.lock().insert(entity, count);
    }

    /// Emits a message to every open subscription for `entity`.
    pub fn emit(&self, entity: EntityKind, message: ChangeMessage) {
        let mut senders = self.senders.lock();
        if let Some(list) = senders.get_mut(&entity) {
            list.retain(|tx| tx.send(message.clone()).is_ok());
        }
    }

    /// Drops every open subscription for `entity`, simulating a stream
    /// error on the consumer side.
    pub fn disconnect(&self, entity: EntityKind) {
        self.senders.lock().remove(&entity);
    }

    /// Returns how many times `entity` was opened.
    pub fn open_count(&self, entity: EntityKind) -> u32 {
        self.open_counts.lock().get(&entity).copied().unwrap_or(0)
    }
}

impl ChangeStream for MockChangeStream {
    fn open(&self, entity: EntityKind) -> Result<Receiver<ChangeMessage>, SyncError> {
        *self.open_counts.lock().entry(entity).or_insert(0) += 1;

        let mut failing = self.failing_opens.lock();
        if let Some(remaining) = failing.get_mut(&entity) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::Stream(format!(
                    "scripted open failure for {entity}"
                )));
            }
        }
        drop(failing);

        let (tx, rx) = mpsc::channel();
        self.senders.lock().entry(entity).or_default().push(tx);
        Ok(rx)
    }
}

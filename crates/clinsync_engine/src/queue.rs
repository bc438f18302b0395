//! Bounded, persisted operation queue and dead-letter list.

use crate::error::SyncResult;
use clinsync_protocol::{Operation, OperationId, OperationStatus};
use clinsync_store::StateStore;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Storage key for the ordered pending queue.
const QUEUE_KEY: &str = "pending-operations";
/// Storage key for the dead-letter list.
const DEAD_LETTER_KEY: &str = "dead-letter";

struct QueueInner {
    queue: VecDeque<Operation>,
    dead: Vec<Operation>,
}

/// A bounded, order-preserving, persisted collection of pending
/// operations, plus the dead-letter list for operations that exhausted
/// their retry budget.
///
/// Every mutation is write-through: the persisted representation and the
/// in-memory representation are identical after each successful call.
/// Failed persistence leaves the in-memory state untouched.
///
/// All mutation runs under a single internal lock; `snapshot` returns an
/// immutable copy so drain iteration never observes concurrent mutation.
pub struct OperationQueue {
    store: Arc<dyn StateStore>,
    capacity: usize,
    inner: Mutex<QueueInner>,
}

impl OperationQueue {
    /// Creates an empty queue over the given store.
    pub fn new(store: Arc<dyn StateStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity,
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                dead: Vec::new(),
            }),
        }
    }

    /// Restores both lists from the store.
    ///
    /// Operations persisted mid-execution are normalized back to
    /// `Queued` so they become eligible again once connectivity is
    /// confirmed.
    pub fn load(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock();

        if let Some(bytes) = self.store.get(QUEUE_KEY)? {
            let mut ops: VecDeque<Operation> = serde_json::from_slice(&bytes)?;
            for op in &mut ops {
                if op.status == OperationStatus::InFlight {
                    op.status = OperationStatus::Queued;
                    op.next_retry_at = None;
                }
            }
            inner.queue = ops;
        }
        if let Some(bytes) = self.store.get(DEAD_LETTER_KEY)? {
            inner.dead = serde_json::from_slice(&bytes)?;
        }

        tracing::debug!(
            queued = inner.queue.len(),
            dead = inner.dead.len(),
            "restored persisted queue state"
        );
        Ok(())
    }

    /// Appends an operation to the tail, evicting the head first when at
    /// capacity. Durable before returning.
    ///
    /// Returns the operation id and the evicted head, if any.
    pub fn enqueue(&self, op: Operation) -> SyncResult<(OperationId, Option<Operation>)> {
        let mut inner = self.inner.lock();
        let id = op.id;

        let mut next: VecDeque<Operation> = inner.queue.clone();
        let evicted = if next.len() >= self.capacity {
            next.pop_front()
        } else {
            None
        };
        next.push_back(op);

        self.persist_queue(&next)?;
        inner.queue = next;

        if let Some(ref gone) = evicted {
            tracing::warn!(evicted = %gone.id, "queue at capacity, evicted oldest operation");
        }
        Ok((id, evicted))
    }

    /// Removes a specific operation regardless of position.
    ///
    /// The caller must cancel any pending retry timer for the id first.
    pub fn dequeue_by_id(&self, id: OperationId) -> SyncResult<Option<Operation>> {
        let mut inner = self.inner.lock();

        let Some(pos) = inner.queue.iter().position(|op| op.id == id) else {
            return Ok(None);
        };

        let mut next = inner.queue.clone();
        let removed = next.remove(pos);
        self.persist_queue(&next)?;
        inner.queue = next;
        Ok(removed)
    }

    /// Returns the operation with the given id, if queued.
    pub fn get(&self, id: OperationId) -> Option<Operation> {
        self.inner.lock().queue.iter().find(|op| op.id == id).cloned()
    }

    /// Atomically claims an operation for execution.
    ///
    /// Marks it `InFlight` and returns it, or returns `None` when the
    /// operation is absent or already claimed. This is the only path to
    /// `InFlight`, so at most one attempt per operation is live at any
    /// instant.
    pub fn claim(&self, id: OperationId) -> SyncResult<Option<Operation>> {
        let mut inner = self.inner.lock();

        let Some(pos) = inner.queue.iter().position(|op| op.id == id) else {
            return Ok(None);
        };
        if inner.queue[pos].status == OperationStatus::InFlight {
            return Ok(None);
        }

        let mut next = inner.queue.clone();
        next[pos].status = OperationStatus::InFlight;
        self.persist_queue(&next)?;
        inner.queue = next;
        Ok(Some(inner.queue[pos].clone()))
    }

    /// Replaces the queued entry carrying the same id.
    ///
    /// Returns false if the operation is no longer queued.
    pub fn update(&self, op: &Operation) -> SyncResult<bool> {
        let mut inner = self.inner.lock();

        let Some(pos) = inner.queue.iter().position(|q| q.id == op.id) else {
            return Ok(false);
        };

        let mut next = inner.queue.clone();
        next[pos] = op.clone();
        self.persist_queue(&next)?;
        inner.queue = next;
        Ok(true)
    }

    /// Moves an operation from the queue to the dead-letter list,
    /// marking it `Dead`.
    pub fn dead_letter(&self, id: OperationId) -> SyncResult<Option<Operation>> {
        let mut inner = self.inner.lock();

        let Some(pos) = inner.queue.iter().position(|op| op.id == id) else {
            return Ok(None);
        };

        let mut op = inner.queue[pos].clone();
        op.status = OperationStatus::Dead;
        op.next_retry_at = None;

        let mut next_queue = inner.queue.clone();
        let _ = next_queue.remove(pos);

        let mut next_dead = inner.dead.clone();
        next_dead.push(op.clone());

        self.persist_queue(&next_queue)?;
        self.persist_dead(&next_dead)?;
        inner.queue = next_queue;
        inner.dead = next_dead;
        Ok(Some(op))
    }

    /// Returns an immutable copy of the queue in FIFO order.
    pub fn snapshot(&self) -> Vec<Operation> {
        self.inner.lock().queue.iter().cloned().collect()
    }

    /// Returns an immutable copy of the dead-letter list.
    pub fn dead_snapshot(&self) -> Vec<Operation> {
        self.inner.lock().dead.clone()
    }

    /// Removes and returns every dead-lettered operation.
    pub fn take_dead(&self) -> SyncResult<Vec<Operation>> {
        let mut inner = self.inner.lock();

        let empty: Vec<Operation> = Vec::new();
        self.persist_dead(&empty)?;
        Ok(std::mem::take(&mut inner.dead))
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Returns the number of dead-lettered operations.
    pub fn dead_len(&self) -> usize {
        self.inner.lock().dead.len()
    }

    fn persist_queue(&self, queue: &VecDeque<Operation>) -> SyncResult<()> {
        let ops: Vec<&Operation> = queue.iter().collect();
        let bytes = serde_json::to_vec(&ops)?;
        self.store.put(QUEUE_KEY, &bytes)?;
        Ok(())
    }

    fn persist_dead(&self, dead: &[Operation]) -> SyncResult<()> {
        let bytes = serde_json::to_vec(dead)?;
        self.store.put(DEAD_LETTER_KEY, &bytes)?;
        Ok(())
    }
}

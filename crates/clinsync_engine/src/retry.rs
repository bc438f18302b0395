//! Retry scheduling with exponential backoff.
//!
//! [`TaskTimer`] is a cancellable scheduled-task abstraction: a priority
//! queue of `(fire_at, task_id)` entries served by one worker thread.
//! Fired ids are delivered over an mpsc channel the coordinator
//! consumes. [`RetryScheduler`] layers the backoff policy on top and
//! owns the retry bookkeeping on operations.

use crate::config::RetryConfig;
use clinsync_protocol::{Operation, OperationId, OperationStatus};
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    fire_at: Instant,
    generation: u64,
    id: OperationId,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.generation.cmp(&other.generation))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    // Latest generation per id. An entry whose generation no longer
    // matches was cancelled or superseded and is discarded when popped.
    live: HashMap<OperationId, u64>,
    next_generation: u64,
    shutdown: bool,
}

/// A cancellable one-shot task timer.
///
/// Each `schedule` arms (or re-arms) a timer keyed by task id; `cancel`
/// disarms it. Due ids are sent in fire order to the receiver obtained
/// from [`TaskTimer::take_receiver`]. Timers are best-effort: nothing is
/// persisted, and a process restart loses pending timers by design.
pub struct TaskTimer {
    shared: Arc<(Mutex<TimerState>, Condvar)>,
    receiver: Mutex<Option<Receiver<OperationId>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskTimer {
    /// Creates a timer and starts its worker thread.
    pub fn new() -> Self {
        let shared = Arc::new((Mutex::new(TimerState::default()), Condvar::new()));
        let (tx, rx) = mpsc::channel();

        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || Self::run(worker_shared, tx));

        Self {
            shared,
            receiver: Mutex::new(Some(rx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    fn run(shared: Arc<(Mutex<TimerState>, Condvar)>, tx: Sender<OperationId>) {
        let (lock, cond) = &*shared;
        let mut state = lock.lock();

        loop {
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            let mut fired = false;
            loop {
                let due = match state.heap.peek() {
                    Some(Reverse(entry)) if entry.fire_at <= now => Some(*entry),
                    _ => None,
                };
                let Some(entry) = due else { break };
                state.heap.pop();

                if state.live.get(&entry.id) == Some(&entry.generation) {
                    state.live.remove(&entry.id);
                    // The channel is unbounded; a dropped receiver just
                    // discards the fire.
                    let _ = tx.send(entry.id);
                    fired = true;
                }
            }
            if fired {
                continue;
            }

            match state.heap.peek() {
                None => cond.wait(&mut state),
                Some(Reverse(entry)) => {
                    let wait = entry.fire_at.saturating_duration_since(now);
                    let _ = cond.wait_for(&mut state, wait);
                }
            }
        }
    }

    /// Takes the fire-notification receiver. Yields each due task id;
    /// ends when the timer is stopped.
    pub fn take_receiver(&self) -> Option<Receiver<OperationId>> {
        self.receiver.lock().take()
    }

    /// Arms (or re-arms) the timer for `id` to fire after `delay`.
    pub fn schedule(&self, id: OperationId, delay: Duration) {
        let (lock, cond) = &*self.shared;
        let mut state = lock.lock();

        let generation = state.next_generation;
        state.next_generation += 1;
        state.live.insert(id, generation);
        state.heap.push(Reverse(TimerEntry {
            fire_at: Instant::now() + delay,
            generation,
            id,
        }));
        cond.notify_one();
    }

    /// Disarms the timer for `id`, if armed.
    pub fn cancel(&self, id: OperationId) {
        let (lock, _) = &*self.shared;
        lock.lock().live.remove(&id);
    }

    /// Returns true if a timer for `id` is armed.
    pub fn is_scheduled(&self, id: OperationId) -> bool {
        let (lock, _) = &*self.shared;
        lock.lock().live.contains_key(&id)
    }

    /// Stops the worker thread and closes the fire channel.
    pub fn stop(&self) {
        let (lock, cond) = &*self.shared;
        {
            let mut state = lock.lock();
            state.shutdown = true;
            cond.notify_one();
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Default for TaskTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides when a failed operation is retried and escalates permanent
/// failures.
///
/// `schedule_retry` owns the retry bookkeeping: it increments
/// `retry_count` (at scheduling time, not at fire time), stamps
/// `next_retry_at`, and arms the timer. Once the budget is exhausted the
/// operation is not rescheduled; the caller moves it to the dead-letter
/// path.
pub struct RetryScheduler {
    config: RetryConfig,
    timer: Arc<TaskTimer>,
}

impl RetryScheduler {
    /// Creates a scheduler over the shared task timer.
    pub fn new(config: RetryConfig, timer: Arc<TaskTimer>) -> Self {
        Self { config, timer }
    }

    /// Stamps the next retry onto a failed operation without arming the
    /// timer.
    ///
    /// Increments `retry_count`, sets `next_retry_at`, and marks the
    /// operation `Failed`. Returns the computed delay, or `None` when
    /// the retry budget is already exhausted, in which case the
    /// operation is left untouched and must be dead-lettered by the
    /// caller.
    ///
    /// Callers persist the updated operation first and then call
    /// [`RetryScheduler::arm`], so a firing timer can never observe a
    /// stale queue entry.
    pub fn prepare_retry(&self, op: &mut Operation, now_ms: u64) -> Option<Duration> {
        if self.config.is_exhausted(op.retry_count) {
            return None;
        }

        let delay = self.config.delay_for(op.retry_count);
        op.retry_count += 1;
        op.next_retry_at = Some(now_ms + delay.as_millis() as u64);
        op.status = OperationStatus::Failed;

        tracing::debug!(
            operation = %op.id,
            retry = op.retry_count,
            delay_ms = delay.as_millis() as u64,
            "retry prepared"
        );
        Some(delay)
    }

    /// Arms the timer for a prepared retry.
    pub fn arm(&self, id: OperationId, delay: Duration) {
        self.timer.schedule(id, delay);
    }

    /// Prepares and immediately arms the next retry.
    ///
    /// Convenience for callers that do not persist queue state between
    /// the two steps. Returns false when the budget is exhausted.
    pub fn schedule_retry(&self, op: &mut Operation, now_ms: u64) -> bool {
        match self.prepare_retry(op, now_ms) {
            Some(delay) => {
                self.arm(op.id, delay);
                true
            }
            None => false,
        }
    }

    /// Cancels the pending retry timer for an operation.
    ///
    /// Mandatory before the operation leaves the queue through any other
    /// path, so a stale timer can never re-execute a removed operation.
    pub fn cancel_retry(&self, id: OperationId) {
        self.timer.cancel(id);
    }

    /// Returns true if a retry timer for `id` is armed.
    pub fn has_pending_retry(&self, id: OperationId) -> bool {
        self.timer.is_scheduled(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinsync_protocol::{EntityKind, WriteRequest};
    use serde_json::json;
    use uuid::Uuid;

    fn make_op() -> Operation {
        Operation::from_request(
            EntityKind::Patients,
            WriteRequest::Create {
                payload: json!({}),
            },
            0,
        )
    }

    #[test]
    fn timer_fires_in_order() {
        let timer = TaskTimer::new();
        let rx = timer.take_receiver().unwrap();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        timer.schedule(b, Duration::from_millis(40));
        timer.schedule(a, Duration::from_millis(10));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), a);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), b);
        timer.stop();
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let timer = TaskTimer::new();
        let rx = timer.take_receiver().unwrap();

        let id = Uuid::new_v4();
        timer.schedule(id, Duration::from_millis(20));
        assert!(timer.is_scheduled(id));
        timer.cancel(id);
        assert!(!timer.is_scheduled(id));

        assert!(rx.recv_timeout(Duration::from_millis(120)).is_err());
        timer.stop();
    }

    #[test]
    fn rescheduling_supersedes_previous_timer() {
        let timer = TaskTimer::new();
        let rx = timer.take_receiver().unwrap();

        let id = Uuid::new_v4();
        timer.schedule(id, Duration::from_millis(300));
        timer.schedule(id, Duration::from_millis(10));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), id);
        // The superseded entry must not fire a second time.
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        timer.stop();
    }

    #[test]
    fn stop_closes_the_channel() {
        let timer = TaskTimer::new();
        let rx = timer.take_receiver().unwrap();

        timer.stop();
        assert!(rx.recv().is_err());
    }

    #[test]
    fn retry_bookkeeping_increments_at_schedule_time() {
        let timer = Arc::new(TaskTimer::new());
        let scheduler = RetryScheduler::new(RetryConfig::default(), Arc::clone(&timer));

        let mut op = make_op();
        assert!(scheduler.schedule_retry(&mut op, 10_000));
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.next_retry_at, Some(11_000)); // 1000ms backoff
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(scheduler.has_pending_retry(op.id));

        timer.stop();
    }

    #[test]
    fn budget_exhaustion_refuses_to_reschedule() {
        let timer = Arc::new(TaskTimer::new());
        let scheduler = RetryScheduler::new(RetryConfig::default(), Arc::clone(&timer));

        let mut op = make_op();
        for expected in 1..=5u32 {
            assert!(scheduler.schedule_retry(&mut op, 0));
            assert_eq!(op.retry_count, expected);
        }

        // Sixth failure: budget exhausted, operation untouched.
        assert!(!scheduler.schedule_retry(&mut op, 0));
        assert_eq!(op.retry_count, 5);

        timer.stop();
    }

    #[test]
    fn cancel_retry_disarms_timer() {
        let timer = Arc::new(TaskTimer::new());
        let scheduler = RetryScheduler::new(RetryConfig::default(), Arc::clone(&timer));

        let mut op = make_op();
        scheduler.schedule_retry(&mut op, 0);
        scheduler.cancel_retry(op.id);
        assert!(!scheduler.has_pending_retry(op.id));

        timer.stop();
    }
}

//! The sync coordinator façade.

use crate::backend::{ChangeStream, WriteBackend};
use crate::clock::now_ms;
use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, ConflictStrategy};
use crate::connection::{ConnectionMonitor, Transition};
use crate::error::{SubmitError, SyncError, SyncResult, WriteError};
use crate::notify::NotificationHub;
use crate::queue::OperationQueue;
use crate::registry::{ListenerRegistry, Subscription};
use crate::retry::{RetryScheduler, TaskTimer};
use crate::status::{SyncStateTracker, SyncStatus};
use crate::subscriber::ChangeStreamSubscriber;
use clinsync_protocol::{
    EntityKind, Operation, OperationId, OperationStatus, SyncEvent, SyncNotification, WriteRequest,
};
use clinsync_store::StateStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use uuid::Uuid;

/// Reserved timer id for backend re-probe tasks. The nil UUID can never
/// collide with an operation id generated at enqueue time.
const PROBE_TASK: OperationId = Uuid::nil();

/// Result of one queue drain call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainOutcome {
    /// False when another drain was already running and this call
    /// no-opped.
    pub ran: bool,
    /// Operations executed successfully and dequeued.
    pub succeeded: usize,
    /// Conflicts resolved and applied during the pass.
    pub conflicts_resolved: usize,
    /// Conflicts paused for an external decision.
    pub conflicts_paused: usize,
    /// Operations rescheduled for a later retry.
    pub rescheduled: usize,
    /// Operations moved to the dead-letter list.
    pub dead_lettered: usize,
}

impl DrainOutcome {
    fn skipped() -> Self {
        Self::default()
    }

    /// Total operations this pass acted on.
    pub fn total_processed(&self) -> usize {
        self.succeeded
            + self.conflicts_resolved
            + self.conflicts_paused
            + self.rescheduled
            + self.dead_lettered
    }
}

/// Outcome of executing one queued operation.
enum ExecOutcome {
    /// The operation was gone or already claimed by another path.
    Skipped,
    Succeeded,
    ConflictResolved,
    ConflictPaused,
    Rescheduled,
    DeadLettered,
}

/// The single entry point for local write intents and queue draining.
///
/// The coordinator composes the monitor, queue, scheduler, resolver,
/// subscriber, registry, and tracker into one explicitly constructed
/// service with a `start()`/`stop()` lifecycle. Outbound writes enter
/// through [`SyncCoordinator::submit`]; inbound change-stream messages
/// fan out through the shared listener registry.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use clinsync_engine::{MockBackend, MockChangeStream, SyncConfig, SyncCoordinator};
/// use clinsync_protocol::{EntityKind, WriteRequest};
/// use clinsync_store::InMemoryStore;
/// use serde_json::json;
///
/// let coordinator = SyncCoordinator::new(
///     SyncConfig::new(),
///     Arc::new(MockBackend::new()),
///     Arc::new(MockChangeStream::new()),
///     Arc::new(InMemoryStore::new()),
/// );
/// coordinator.start().unwrap();
///
/// let op_id = coordinator
///     .submit(
///         EntityKind::Patients,
///         WriteRequest::Create { payload: json!({"name": "Ann"}) },
///     )
///     .unwrap();
/// println!("submitted {op_id}");
/// coordinator.stop();
/// ```
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: SyncConfig,
    backend: Arc<dyn WriteBackend>,
    monitor: Arc<ConnectionMonitor>,
    queue: OperationQueue,
    timer: Arc<TaskTimer>,
    scheduler: RetryScheduler,
    resolver: ConflictResolver,
    registry: ListenerRegistry,
    subscriber: ChangeStreamSubscriber,
    tracker: Arc<SyncStateTracker>,
    notifications: NotificationHub,
    draining: AtomicBool,
    started: AtomicBool,
    probe_attempts: AtomicU32,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Composes a coordinator from its collaborators.
    ///
    /// Nothing runs until [`SyncCoordinator::start`] is called.
    pub fn new(
        config: SyncConfig,
        backend: Arc<dyn WriteBackend>,
        stream: Arc<dyn ChangeStream>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let monitor = Arc::new(ConnectionMonitor::new());
        let tracker = Arc::new(SyncStateTracker::new());
        let registry = ListenerRegistry::new();
        let timer = Arc::new(TaskTimer::new());

        let queue = OperationQueue::new(store, config.queue_capacity);
        let scheduler = RetryScheduler::new(config.retry.clone(), Arc::clone(&timer));
        let subscriber = ChangeStreamSubscriber::new(
            stream,
            registry.clone(),
            Arc::clone(&monitor),
            Arc::clone(&tracker),
            config.resubscribe_delay,
        );

        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                monitor,
                queue,
                timer,
                scheduler,
                resolver: ConflictResolver::default(),
                registry,
                subscriber,
                tracker,
                notifications: NotificationHub::new(),
                draining: AtomicBool::new(false),
                started: AtomicBool::new(false),
                probe_attempts: AtomicU32::new(0),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    /// Starts the coordinator: restores persisted state, wires the
    /// connectivity callbacks, probes the backend, and opens the
    /// change-stream subscriptions.
    ///
    /// Idempotent; a second call is a no-op.
    pub fn start(&self) -> SyncResult<()> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        inner.queue.load()?;

        // Timer fires (operation retries and backend re-probes) are
        // dispatched from a dedicated thread.
        if let Some(rx) = inner.timer.take_receiver() {
            let dispatch_inner = Arc::clone(inner);
            let handle = thread::spawn(move || {
                for id in rx {
                    if id == PROBE_TASK {
                        dispatch_inner.run_probe();
                    } else {
                        dispatch_inner.handle_retry_fire(id);
                    }
                }
            });
            *inner.dispatcher.lock() = Some(handle);
        }

        let weak = Arc::downgrade(inner);
        inner.monitor.on_transition(move |transition| {
            let Some(inner) = weak.upgrade() else { return };
            match transition {
                Transition::Online => inner.handle_online(),
                Transition::Offline => inner.monitor.set_backend_reachable(false),
                _ => {}
            }
        });

        inner.handle_online();
        inner.subscriber.subscribe_all(&inner.config.entities);

        tracing::info!(
            entities = inner.config.entities.len(),
            queued = inner.queue.len(),
            "sync coordinator started"
        );
        Ok(())
    }

    /// Stops the coordinator: closes subscriptions, stops the timer,
    /// and joins the dispatch thread. Queue state is already durable.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.started.swap(false, Ordering::SeqCst) {
            return;
        }

        inner.subscriber.unsubscribe_all();
        inner.timer.stop();
        if let Some(handle) = inner.dispatcher.lock().take() {
            let _ = handle.join();
        }
        tracing::info!("sync coordinator stopped");
    }

    /// Accepts a local write intent.
    ///
    /// Malformed submissions are rejected synchronously and never enter
    /// the queue. When online and backend-reachable, the write is
    /// attempted immediately; otherwise (or on failure) it is queued.
    /// The call never blocks on network I/O once the engine has
    /// determined it is offline.
    pub fn submit(
        &self,
        entity: EntityKind,
        request: WriteRequest,
    ) -> Result<OperationId, SubmitError> {
        let inner = &self.inner;
        if !inner.started.load(Ordering::SeqCst) {
            return Err(SubmitError::NotStarted);
        }
        request.validate()?;

        let op = Operation::from_request(entity, request, now_ms());
        let id = op.id;

        if inner.monitor.is_online() && inner.monitor.is_backend_reachable() {
            inner.attempt_immediate(op).map_err(SubmitError::Engine)?;
        } else {
            inner.enqueue_op(op).map_err(SubmitError::Engine)?;
        }
        Ok(id)
    }

    /// Accepts a local write intent for a collection named by string.
    ///
    /// An unknown collection name is a malformed submission.
    pub fn submit_named(
        &self,
        entity: &str,
        request: WriteRequest,
    ) -> Result<OperationId, SubmitError> {
        let entity = EntityKind::from_str(entity)?;
        self.submit(entity, request)
    }

    /// Processes a snapshot of the queue in FIFO order.
    ///
    /// Mutually exclusive: a call that finds another drain running
    /// returns immediately with `ran == false` and executes nothing.
    /// Each operation's outcome is contained to that operation; the pass
    /// never aborts early.
    pub fn drain_queue(&self) -> SyncResult<DrainOutcome> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(SyncError::NotStarted);
        }
        Ok(self.inner.drain())
    }

    /// Re-enqueues every dead-lettered operation for one more attempt
    /// cycle, then drains if the backend is reachable.
    ///
    /// Returns the number of replayed operations.
    pub fn retry_dead_lettered(&self) -> SyncResult<usize> {
        let inner = &self.inner;
        if !inner.started.load(Ordering::SeqCst) {
            return Err(SyncError::NotStarted);
        }

        let dead = inner.queue.take_dead()?;
        let count = dead.len();
        for mut op in dead {
            op.status = OperationStatus::Queued;
            op.next_retry_at = None;
            inner.enqueue_op(op)?;
        }

        if count > 0 {
            tracing::info!(count, "replaying dead-lettered operations");
            if inner.monitor.is_online() && inner.monitor.is_backend_reachable() {
                inner.drain();
            }
        }
        Ok(count)
    }

    /// Replaces the active conflict strategy.
    pub fn set_conflict_strategy(&self, strategy: ConflictStrategy) {
        self.inner.resolver.set_strategy(strategy);
    }

    /// Returns the active conflict strategy.
    pub fn conflict_strategy(&self) -> ConflictStrategy {
        self.inner.resolver.strategy()
    }

    /// Registers a handler for sync events of one entity kind.
    pub fn subscribe<F>(&self, entity: EntityKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(entity, handler)
    }

    /// Subscribes to out-of-band notifications.
    pub fn notifications(&self) -> Receiver<SyncNotification> {
        self.inner.notifications.subscribe()
    }

    /// Returns a point-in-time status snapshot.
    pub fn status(&self) -> SyncStatus {
        let inner = &self.inner;
        inner.tracker.status(
            inner.monitor.is_online(),
            inner.monitor.is_backend_reachable(),
            inner.queue.len(),
            inner.queue.dead_len(),
            inner.subscriber.active_count(),
        )
    }

    /// The connectivity monitor, for wiring platform reachability
    /// signals into the engine.
    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.inner.monitor
    }
}

impl Inner {
    /// Immediate-send path for a fresh submission.
    fn attempt_immediate(&self, op: Operation) -> SyncResult<()> {
        match self.backend.execute(&op) {
            Ok(applied) => {
                self.tracker.record_write_succeeded();
                self.publish_event(SyncEvent::live(
                    op.entity,
                    op.action,
                    applied,
                    Some(op.id),
                    now_ms(),
                    true,
                ));
                Ok(())
            }
            Err(WriteError::Conflict { remote }) => self.conflict_on_submit(op, remote),
            Err(error) => {
                tracing::warn!(operation = %op.id, %error, "immediate write failed, queueing");
                self.tracker.record_write_failed();
                self.enqueue_with_retry(op)
            }
        }
    }

    /// Conflict handling for the immediate-send path.
    fn conflict_on_submit(&self, op: Operation, remote: Value) -> SyncResult<()> {
        match self.resolver.resolve(&op, &remote) {
            Some(resolved) => match self.backend.execute(&resolved) {
                Ok(applied) => {
                    self.tracker.record_conflict_resolved();
                    self.publish_event(SyncEvent::live(
                        resolved.entity,
                        resolved.action,
                        applied,
                        Some(resolved.id),
                        now_ms(),
                        true,
                    ));
                    Ok(())
                }
                Err(error) => {
                    // The resolved write re-enters the normal retry
                    // path, not conflict resolution.
                    tracing::warn!(operation = %resolved.id, %error, "resolved write failed");
                    self.tracker.record_write_failed();
                    self.enqueue_with_retry(resolved)
                }
            },
            None => {
                self.pause_for_manual_resolution(op, remote);
                Ok(())
            }
        }
    }

    /// Appends to the queue, surfacing capacity eviction.
    fn enqueue_op(&self, op: Operation) -> SyncResult<()> {
        let (_, evicted) = self.queue.enqueue(op)?;
        if let Some(evicted) = evicted {
            self.scheduler.cancel_retry(evicted.id);
            self.tracker.record_eviction();
            self.notifications
                .emit(SyncNotification::QueueOverflow { evicted });
        }
        Ok(())
    }

    /// Appends to the queue and arms the first retry timer.
    ///
    /// The entry is enqueued with its retry bookkeeping already stamped
    /// and the timer armed last, so a fire can only observe the final
    /// persisted state.
    fn enqueue_with_retry(&self, mut op: Operation) -> SyncResult<()> {
        match self.scheduler.prepare_retry(&mut op, now_ms()) {
            Some(delay) => {
                let id = op.id;
                self.enqueue_op(op)?;
                self.scheduler.arm(id, delay);
            }
            None => {
                self.enqueue_op(op.clone())?;
                self.dead_letter(op.id)?;
            }
        }
        Ok(())
    }

    /// Moves an operation to the dead-letter list and raises the
    /// notification.
    fn dead_letter(&self, id: OperationId) -> SyncResult<()> {
        self.scheduler.cancel_retry(id);
        if let Some(dead) = self.queue.dead_letter(id)? {
            tracing::warn!(operation = %dead.id, retries = dead.retry_count, "operation dead-lettered");
            self.tracker.record_dead_lettered();
            self.notifications
                .emit(SyncNotification::OperationDeadLettered { operation: dead });
        }
        Ok(())
    }

    /// Removes a paused conflict from the queue and surfaces it.
    fn pause_for_manual_resolution(&self, mut op: Operation, remote: Value) {
        op.status = OperationStatus::Queued;
        op.next_retry_at = None;
        tracing::info!(operation = %op.id, "conflict awaiting manual resolution");
        self.notifications.emit(SyncNotification::ConflictPending {
            operation: op,
            remote,
        });
    }

    /// Executes one queued operation end to end.
    ///
    /// The claim marks the operation in-flight atomically, so a retry
    /// timer firing concurrently with a drain can never run the same
    /// operation twice.
    fn execute_queued(&self, id: OperationId) -> SyncResult<ExecOutcome> {
        let Some(op) = self.queue.claim(id)? else {
            return Ok(ExecOutcome::Skipped);
        };

        match self.backend.execute(&op) {
            Ok(applied) => {
                self.queue.dequeue_by_id(id)?;
                self.tracker.record_write_succeeded();
                self.publish_event(SyncEvent::fallback(
                    op.entity,
                    op.action,
                    applied,
                    op.id,
                    now_ms(),
                    self.monitor.is_online(),
                ));
                Ok(ExecOutcome::Succeeded)
            }
            Err(WriteError::Conflict { remote }) => self.conflict_on_queued(op, remote),
            Err(error) => {
                tracing::debug!(operation = %op.id, %error, "queued write failed");
                self.tracker.record_write_failed();
                let mut op = op;
                match self.scheduler.prepare_retry(&mut op, now_ms()) {
                    Some(delay) => {
                        self.queue.update(&op)?;
                        self.scheduler.arm(op.id, delay);
                        Ok(ExecOutcome::Rescheduled)
                    }
                    None => {
                        self.dead_letter(op.id)?;
                        Ok(ExecOutcome::DeadLettered)
                    }
                }
            }
        }
    }

    /// Conflict handling for a queued operation.
    fn conflict_on_queued(&self, op: Operation, remote: Value) -> SyncResult<ExecOutcome> {
        match self.resolver.resolve(&op, &remote) {
            Some(resolved) => {
                // Persist the payload replacement before re-attempting.
                self.queue.update(&resolved)?;
                match self.backend.execute(&resolved) {
                    Ok(applied) => {
                        self.queue.dequeue_by_id(resolved.id)?;
                        self.tracker.record_conflict_resolved();
                        self.publish_event(SyncEvent::fallback(
                            resolved.entity,
                            resolved.action,
                            applied,
                            resolved.id,
                            now_ms(),
                            self.monitor.is_online(),
                        ));
                        Ok(ExecOutcome::ConflictResolved)
                    }
                    Err(error) => {
                        tracing::warn!(operation = %resolved.id, %error, "resolved write failed");
                        self.tracker.record_write_failed();
                        let mut resolved = resolved;
                        match self.scheduler.prepare_retry(&mut resolved, now_ms()) {
                            Some(delay) => {
                                self.queue.update(&resolved)?;
                                self.scheduler.arm(resolved.id, delay);
                                Ok(ExecOutcome::Rescheduled)
                            }
                            None => {
                                self.dead_letter(resolved.id)?;
                                Ok(ExecOutcome::DeadLettered)
                            }
                        }
                    }
                }
            }
            None => {
                self.queue.dequeue_by_id(op.id)?;
                self.pause_for_manual_resolution(op, remote);
                Ok(ExecOutcome::ConflictPaused)
            }
        }
    }

    /// One exclusive pass over the queue snapshot.
    fn drain(&self) -> DrainOutcome {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("drain already in progress");
            return DrainOutcome::skipped();
        }

        let snapshot = self.queue.snapshot();
        tracing::info!(depth = snapshot.len(), "draining queue");

        let mut outcome = DrainOutcome {
            ran: true,
            ..DrainOutcome::default()
        };
        for op in snapshot {
            // Cancel the pending timer before this path executes the
            // operation, guaranteeing at most one attempt in flight.
            self.scheduler.cancel_retry(op.id);

            match self.execute_queued(op.id) {
                Ok(ExecOutcome::Skipped) => {}
                Ok(ExecOutcome::Succeeded) => outcome.succeeded += 1,
                Ok(ExecOutcome::ConflictResolved) => outcome.conflicts_resolved += 1,
                Ok(ExecOutcome::ConflictPaused) => outcome.conflicts_paused += 1,
                Ok(ExecOutcome::Rescheduled) => outcome.rescheduled += 1,
                Ok(ExecOutcome::DeadLettered) => outcome.dead_lettered += 1,
                Err(error) => {
                    // Contained to this operation; the pass continues.
                    tracing::error!(operation = %op.id, %error, "drain step failed");
                }
            }
        }

        self.tracker.record_drain_completed(now_ms());
        self.draining.store(false, Ordering::SeqCst);
        outcome
    }

    /// A retry timer fired for one operation.
    fn handle_retry_fire(&self, id: OperationId) {
        if !self.monitor.is_online() {
            // Left queued; the reconnect drain picks it up.
            tracing::debug!(operation = %id, "retry fired while offline");
            return;
        }
        if let Err(error) = self.execute_queued(id) {
            tracing::error!(operation = %id, %error, "retry execution failed");
        }
    }

    /// The network came (back) up: probe, then drain on success.
    fn handle_online(&self) {
        self.probe_attempts.store(0, Ordering::SeqCst);
        self.run_probe();
    }

    /// One backend reachability probe. A failed probe never errors; it
    /// leaves the signal down and re-arms itself with the retry backoff
    /// policy.
    fn run_probe(&self) {
        if !self.monitor.is_online() {
            return;
        }

        if self.backend.probe() {
            self.probe_attempts.store(0, Ordering::SeqCst);
            self.monitor.set_backend_reachable(true);
            if !self.queue.is_empty() {
                self.drain();
            }
        } else {
            self.monitor.set_backend_reachable(false);
            let attempt = self.probe_attempts.fetch_add(1, Ordering::SeqCst);
            let delay = self.config.retry.delay_for(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "backend probe failed");
            self.timer.schedule(PROBE_TASK, delay);
        }
    }

    fn publish_event(&self, event: SyncEvent) {
        self.registry.publish(&event);
        self.tracker.record_event_published();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockChangeStream};
    use crate::config::RetryConfig;
    use clinsync_protocol::EventOrigin;
    use clinsync_store::InMemoryStore;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(80))
    }

    fn make_coordinator(
        backend: Arc<MockBackend>,
        stream: Arc<MockChangeStream>,
    ) -> SyncCoordinator {
        let config = SyncConfig::new()
            .with_retry(fast_retry())
            .with_resubscribe_delay(Duration::from_millis(20));
        SyncCoordinator::new(
            config,
            backend,
            stream,
            Arc::new(InMemoryStore::new()),
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn create_request(n: u64) -> WriteRequest {
        WriteRequest::Create {
            payload: json!({ "n": n }),
        }
    }

    #[test]
    fn submit_requires_start() {
        let coordinator = make_coordinator(
            Arc::new(MockBackend::new()),
            Arc::new(MockChangeStream::new()),
        );
        let err = coordinator
            .submit(EntityKind::Patients, create_request(1))
            .unwrap_err();
        assert!(matches!(err, SubmitError::NotStarted));
    }

    #[test]
    fn malformed_submission_never_enters_queue() {
        let backend = Arc::new(MockBackend::new());
        let coordinator = make_coordinator(Arc::clone(&backend), Arc::new(MockChangeStream::new()));
        coordinator.start().unwrap();

        let err = coordinator
            .submit(
                EntityKind::Patients,
                WriteRequest::Update {
                    key: String::new(),
                    payload: json!({}),
                },
            )
            .unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(_)));

        let err = coordinator
            .submit_named("prescriptions", create_request(1))
            .unwrap_err();
        assert!(matches!(err, SubmitError::UnknownEntity(_)));

        assert_eq!(coordinator.status().queue_depth, 0);
        assert_eq!(backend.execution_count(), 0);
        coordinator.stop();
    }

    #[test]
    fn online_submit_publishes_live_event() {
        let backend = Arc::new(MockBackend::new());
        let coordinator = make_coordinator(Arc::clone(&backend), Arc::new(MockChangeStream::new()));
        coordinator.start().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        let _sub = coordinator.subscribe(EntityKind::Patients, move |event| {
            e.lock().push(event.clone());
        });

        let id = coordinator
            .submit(EntityKind::Patients, create_request(7))
            .unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin, EventOrigin::Live);
        assert_eq!(events[0].operation_id, Some(id));
        assert_eq!(events[0].data, json!({"n": 7}));
        assert_eq!(coordinator.status().queue_depth, 0);
        coordinator.stop();
    }

    #[test]
    fn offline_submit_enqueues_without_network_io() {
        let backend = Arc::new(MockBackend::new());
        let coordinator = make_coordinator(Arc::clone(&backend), Arc::new(MockChangeStream::new()));
        coordinator.start().unwrap();
        let baseline = backend.execution_count();

        coordinator.monitor().set_online(false);
        for n in 0..3 {
            coordinator
                .submit(EntityKind::Patients, create_request(n))
                .unwrap();
        }

        assert_eq!(backend.execution_count(), baseline);
        let status = coordinator.status();
        assert_eq!(status.queue_depth, 3);
        assert!(!status.online);
        coordinator.stop();
    }

    #[test]
    fn reconnect_drains_in_fifo_order() {
        let backend = Arc::new(MockBackend::new());
        let coordinator = make_coordinator(Arc::clone(&backend), Arc::new(MockChangeStream::new()));
        coordinator.start().unwrap();

        coordinator.monitor().set_online(false);
        let ids: Vec<OperationId> = (0..3)
            .map(|n| {
                coordinator
                    .submit(EntityKind::Patients, create_request(n))
                    .unwrap()
            })
            .collect();

        coordinator.monitor().set_online(true);
        assert!(wait_until(|| coordinator.status().queue_depth == 0));

        let executed: Vec<OperationId> =
            backend.executed().iter().map(|op| op.id).collect();
        assert_eq!(executed, ids);
        assert!(coordinator.status().last_drain_at.is_some());
        coordinator.stop();
    }

    #[test]
    fn drained_writes_publish_fallback_events() {
        let backend = Arc::new(MockBackend::new());
        let coordinator = make_coordinator(Arc::clone(&backend), Arc::new(MockChangeStream::new()));
        coordinator.start().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        let _sub = coordinator.subscribe(EntityKind::Invoices, move |event| {
            e.lock().push(event.clone());
        });

        coordinator.monitor().set_online(false);
        let id = coordinator
            .submit(EntityKind::Invoices, create_request(1))
            .unwrap();
        coordinator.monitor().set_online(true);

        assert!(wait_until(|| !events.lock().is_empty()));
        let events = events.lock();
        assert_eq!(events[0].origin, EventOrigin::Fallback);
        assert_eq!(events[0].operation_id, Some(id));
        coordinator.stop();
    }

    #[test]
    fn failed_write_retries_until_success() {
        let backend = Arc::new(MockBackend::new());
        let coordinator = make_coordinator(Arc::clone(&backend), Arc::new(MockChangeStream::new()));
        coordinator.start().unwrap();

        backend.fail_next([
            WriteError::Timeout,
            WriteError::Unavailable("502".into()),
        ]);
        coordinator
            .submit(EntityKind::Patients, create_request(1))
            .unwrap();

        // Attempt 1 fails inline, attempt 2 fails on the first retry,
        // attempt 3 succeeds and dequeues.
        assert!(wait_until(|| coordinator.status().queue_depth == 0));
        assert_eq!(backend.execution_count(), 3);
        assert_eq!(coordinator.status().writes_failed, 2);
        assert_eq!(coordinator.status().writes_succeeded, 1);
        coordinator.stop();
    }

    #[test]
    fn exhausted_retries_dead_letter_with_notification() {
        let backend = Arc::new(MockBackend::new());
        let coordinator = make_coordinator(Arc::clone(&backend), Arc::new(MockChangeStream::new()));
        coordinator.start().unwrap();
        let notifications = coordinator.notifications();

        // Initial attempt plus five retries, all failing.
        backend.fail_next(std::iter::repeat_with(|| WriteError::Timeout).take(6));
        coordinator
            .submit(EntityKind::Patients, create_request(1))
            .unwrap();

        assert!(wait_until(|| coordinator.status().dead_letter_count == 1));
        assert_eq!(backend.execution_count(), 6);
        assert_eq!(coordinator.status().queue_depth, 0);

        let note = notifications
            .recv_timeout(Duration::from_secs(1))
            .unwrap();
        assert!(matches!(
            note,
            SyncNotification::OperationDeadLettered { .. }
        ));
        coordinator.stop();
    }

    #[test]
    fn dead_lettered_operations_replay_once() {
        let backend = Arc::new(MockBackend::new());
        let coordinator = make_coordinator(Arc::clone(&backend), Arc::new(MockChangeStream::new()));
        coordinator.start().unwrap();

        backend.fail_next(std::iter::repeat_with(|| WriteError::Timeout).take(6));
        coordinator
            .submit(EntityKind::Patients, create_request(1))
            .unwrap();
        assert!(wait_until(|| coordinator.status().dead_letter_count == 1));

        // Backend healthy again; one replay cycle succeeds.
        let replayed = coordinator.retry_dead_lettered().unwrap();
        assert_eq!(replayed, 1);
        assert!(wait_until(|| {
            let status = coordinator.status();
            status.dead_letter_count == 0 && status.queue_depth == 0
        }));
        assert_eq!(coordinator.status().writes_succeeded, 1);
        coordinator.stop();
    }

    #[test]
    fn queue_eviction_raises_overflow_notification() {
        let backend = Arc::new(MockBackend::new());
        let stream = Arc::new(MockChangeStream::new());
        let config = SyncConfig::new()
            .with_queue_capacity(2)
            .with_retry(fast_retry());
        let coordinator = SyncCoordinator::new(
            config,
            Arc::clone(&backend) as Arc<dyn WriteBackend>,
            stream,
            Arc::new(InMemoryStore::new()),
        );
        coordinator.start().unwrap();
        let notifications = coordinator.notifications();

        coordinator.monitor().set_online(false);
        let first = coordinator
            .submit(EntityKind::Patients, create_request(0))
            .unwrap();
        for n in 1..3 {
            coordinator
                .submit(EntityKind::Patients, create_request(n))
                .unwrap();
        }

        assert_eq!(coordinator.status().queue_depth, 2);
        match notifications.recv_timeout(Duration::from_secs(1)).unwrap() {
            SyncNotification::QueueOverflow { evicted } => assert_eq!(evicted.id, first),
            other => panic!("expected overflow, got {other:?}"),
        }
        assert_eq!(coordinator.status().operations_evicted, 1);
        coordinator.stop();
    }

    #[test]
    fn success_via_drain_cancels_pending_retry() {
        let backend = Arc::new(MockBackend::new());
        let stream = Arc::new(MockChangeStream::new());
        // Long retry delay keeps the timer pending while we drain.
        let config = SyncConfig::new().with_retry(
            RetryConfig::new(5).with_initial_delay(Duration::from_millis(150)),
        );
        let coordinator = SyncCoordinator::new(
            config,
            Arc::clone(&backend) as Arc<dyn WriteBackend>,
            stream,
            Arc::new(InMemoryStore::new()),
        );
        coordinator.start().unwrap();

        backend.fail_next([WriteError::Timeout]);
        coordinator
            .submit(EntityKind::Patients, create_request(1))
            .unwrap();
        assert_eq!(coordinator.status().queue_depth, 1);

        // Drain succeeds before the retry timer fires.
        let outcome = coordinator.drain_queue().unwrap();
        assert!(outcome.ran);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(backend.execution_count(), 2);

        // The stale timer must not re-execute the removed operation.
        thread::sleep(Duration::from_millis(300));
        assert_eq!(backend.execution_count(), 2);
        coordinator.stop();
    }

    #[test]
    fn concurrent_drain_no_ops() {
        struct SlowBackend {
            delegate: MockBackend,
        }
        impl WriteBackend for SlowBackend {
            fn execute(&self, operation: &Operation) -> crate::backend::WriteResult {
                thread::sleep(Duration::from_millis(60));
                self.delegate.execute(operation)
            }
            fn probe(&self) -> bool {
                true
            }
        }

        let backend = Arc::new(SlowBackend {
            delegate: MockBackend::new(),
        });
        let coordinator = SyncCoordinator::new(
            SyncConfig::new().with_retry(fast_retry()),
            Arc::clone(&backend) as Arc<dyn WriteBackend>,
            Arc::new(MockChangeStream::new()),
            Arc::new(InMemoryStore::new()),
        );
        coordinator.start().unwrap();

        coordinator.monitor().set_online(false);
        for n in 0..2 {
            coordinator
                .submit(EntityKind::Patients, create_request(n))
                .unwrap();
        }
        // Reconnect while suppressing the automatic drain path: probe
        // runs on this thread, so the drain below is the first pass.
        coordinator.monitor().set_backend_reachable(true);

        let c = SyncCoordinator {
            inner: Arc::clone(&coordinator.inner),
        };
        let first = thread::spawn(move || c.drain_queue().unwrap());
        thread::sleep(Duration::from_millis(20));

        let second = coordinator.drain_queue().unwrap();
        assert!(!second.ran);
        assert_eq!(second.total_processed(), 0);

        let first = first.join().unwrap();
        assert!(first.ran);
        assert_eq!(first.succeeded, 2);
        assert_eq!(backend.delegate.execution_count(), 2);
        coordinator.stop();
    }

    #[test]
    fn probe_failure_keeps_backend_unreachable() {
        let backend = Arc::new(MockBackend::new());
        backend.set_reachable(false);
        let coordinator = make_coordinator(Arc::clone(&backend), Arc::new(MockChangeStream::new()));
        coordinator.start().unwrap();

        let status = coordinator.status();
        assert!(status.online);
        assert!(!status.backend_reachable);

        // Submissions queue instead of attempting network I/O.
        coordinator
            .submit(EntityKind::Patients, create_request(1))
            .unwrap();
        assert_eq!(coordinator.status().queue_depth, 1);

        // Backend recovers; the scheduled re-probe drains the queue.
        backend.set_reachable(true);
        assert!(wait_until(|| {
            let status = coordinator.status();
            status.backend_reachable && status.queue_depth == 0
        }));
        coordinator.stop();
    }

    #[test]
    fn restart_restores_persisted_queue() {
        let store = Arc::new(InMemoryStore::new());
        let backend = Arc::new(MockBackend::new());

        {
            let coordinator = SyncCoordinator::new(
                SyncConfig::new().with_retry(fast_retry()),
                Arc::clone(&backend) as Arc<dyn WriteBackend>,
                Arc::new(MockChangeStream::new()),
                Arc::clone(&store) as Arc<dyn StateStore>,
            );
            coordinator.start().unwrap();
            coordinator.monitor().set_online(false);
            for n in 0..2 {
                coordinator
                    .submit(EntityKind::Patients, create_request(n))
                    .unwrap();
            }
            coordinator.stop();
        }

        // New process: state is restored and drained once connectivity
        // is confirmed at startup.
        let coordinator = SyncCoordinator::new(
            SyncConfig::new().with_retry(fast_retry()),
            Arc::clone(&backend) as Arc<dyn WriteBackend>,
            Arc::new(MockChangeStream::new()),
            store as Arc<dyn StateStore>,
        );
        coordinator.start().unwrap();
        assert!(wait_until(|| coordinator.status().queue_depth == 0));
        assert_eq!(backend.execution_count(), 2);
        coordinator.stop();
    }
}

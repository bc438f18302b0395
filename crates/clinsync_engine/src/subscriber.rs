//! Per-entity change-stream subscriptions.

use crate::backend::ChangeStream;
use crate::clock::now_ms;
use crate::connection::ConnectionMonitor;
use crate::registry::ListenerRegistry;
use crate::status::SyncStateTracker;
use clinsync_protocol::{EntityKind, SyncEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poll interval for the shutdown flag while waiting on a stream.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// State of one logical entity subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No subscription is open.
    Disconnected,
    /// A subscription attempt is in progress.
    Subscribing,
    /// Messages are flowing.
    Subscribed,
    /// Shut down; terminal.
    Closed,
}

/// Maintains one logical subscription per tracked entity kind and
/// translates inbound messages into [`SyncEvent`]s.
///
/// Each entity runs on its own worker thread, so a subscription error
/// for one entity never affects another. A failed or dropped
/// subscription is re-opened automatically after a fixed delay until
/// shutdown.
pub struct ChangeStreamSubscriber {
    stream: Arc<dyn ChangeStream>,
    registry: ListenerRegistry,
    monitor: Arc<ConnectionMonitor>,
    tracker: Arc<SyncStateTracker>,
    states: Arc<RwLock<HashMap<EntityKind, StreamState>>>,
    shutdown: Arc<AtomicBool>,
    resubscribe_delay: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ChangeStreamSubscriber {
    /// Creates a subscriber with no open subscriptions.
    pub fn new(
        stream: Arc<dyn ChangeStream>,
        registry: ListenerRegistry,
        monitor: Arc<ConnectionMonitor>,
        tracker: Arc<SyncStateTracker>,
        resubscribe_delay: Duration,
    ) -> Self {
        Self {
            stream,
            registry,
            monitor,
            tracker,
            states: Arc::new(RwLock::new(HashMap::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            resubscribe_delay,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Opens a logical subscription for one entity kind.
    ///
    /// A no-op if the entity is already tracked or the subscriber was
    /// shut down.
    pub fn subscribe(&self, entity: EntityKind) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut states = self.states.write();
            if states.contains_key(&entity) {
                return;
            }
            states.insert(entity, StreamState::Disconnected);
        }

        let stream = Arc::clone(&self.stream);
        let registry = self.registry.clone();
        let monitor = Arc::clone(&self.monitor);
        let tracker = Arc::clone(&self.tracker);
        let states = Arc::clone(&self.states);
        let shutdown = Arc::clone(&self.shutdown);
        let resubscribe_delay = self.resubscribe_delay;

        let worker = thread::spawn(move || {
            Self::run(
                entity,
                stream,
                registry,
                monitor,
                tracker,
                states,
                shutdown,
                resubscribe_delay,
            );
        });
        self.workers.lock().push(worker);
    }

    /// Opens subscriptions for every listed entity kind.
    pub fn subscribe_all(&self, entities: &[EntityKind]) {
        for entity in entities {
            self.subscribe(*entity);
        }
    }

    /// Returns the state of one entity subscription.
    pub fn state(&self, entity: EntityKind) -> StreamState {
        self.states
            .read()
            .get(&entity)
            .copied()
            .unwrap_or(StreamState::Disconnected)
    }

    /// Returns the number of subscriptions currently delivering.
    pub fn active_count(&self) -> usize {
        self.states
            .read()
            .values()
            .filter(|state| **state == StreamState::Subscribed)
            .count()
    }

    /// Closes every subscription. Terminal: the subscriber cannot be
    /// reused afterwards.
    pub fn unsubscribe_all(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }

        let mut states = self.states.write();
        for state in states.values_mut() {
            *state = StreamState::Closed;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        entity: EntityKind,
        stream: Arc<dyn ChangeStream>,
        registry: ListenerRegistry,
        monitor: Arc<ConnectionMonitor>,
        tracker: Arc<SyncStateTracker>,
        states: Arc<RwLock<HashMap<EntityKind, StreamState>>>,
        shutdown: Arc<AtomicBool>,
        resubscribe_delay: Duration,
    ) {
        let set_state = |state: StreamState| {
            states.write().insert(entity, state);
        };

        while !shutdown.load(Ordering::SeqCst) {
            set_state(StreamState::Subscribing);

            match stream.open(entity) {
                Ok(rx) => {
                    set_state(StreamState::Subscribed);
                    tracing::info!(%entity, "change stream subscribed");

                    loop {
                        if shutdown.load(Ordering::SeqCst) {
                            set_state(StreamState::Closed);
                            return;
                        }
                        match rx.recv_timeout(POLL_INTERVAL) {
                            Ok(message) => {
                                let event = SyncEvent::live(
                                    entity,
                                    message.kind.to_action(),
                                    message.record(),
                                    None,
                                    now_ms(),
                                    monitor.is_online(),
                                );
                                registry.publish(&event);
                                tracker.record_event_published();
                            }
                            Err(RecvTimeoutError::Timeout) => continue,
                            Err(RecvTimeoutError::Disconnected) => {
                                tracing::warn!(%entity, "change stream dropped");
                                break;
                            }
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%entity, %error, "change stream subscription failed");
                }
            }

            set_state(StreamState::Disconnected);

            // Wait out the re-subscribe delay in slices so shutdown
            // stays responsive.
            let mut waited = Duration::ZERO;
            while waited < resubscribe_delay && !shutdown.load(Ordering::SeqCst) {
                let slice = POLL_INTERVAL.min(resubscribe_delay - waited);
                thread::sleep(slice);
                waited += slice;
            }
        }

        set_state(StreamState::Closed);
    }
}

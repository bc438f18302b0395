//! In-process publish/subscribe directory for sync events.

use clinsync_protocol::{EntityKind, SyncEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct RegistryInner {
    listeners: RwLock<HashMap<EntityKind, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

/// Maps entity kinds to interested consumers.
///
/// Handlers run synchronously, in registration order, each inside an
/// isolated panic boundary: a handler that panics is logged and never
/// prevents the remaining handlers from running, nor reaches the
/// publisher. The handler list is copied before iteration, so
/// subscribing during a publish cannot invalidate it.
///
/// The registry is cheaply cloneable; clones share the same directory.
#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                listeners: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a handler for one entity kind.
    ///
    /// The returned [`Subscription`] detaches the handler; dropping it
    /// without calling `unsubscribe` leaves the handler registered.
    pub fn subscribe<F>(&self, entity: EntityKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .entry(entity)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            inner: Arc::downgrade(&self.inner),
            entity,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Delivers an event to every handler registered for its entity.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, event: &SyncEvent) -> usize {
        let handlers: Vec<Handler> = {
            let listeners = self.inner.listeners.read();
            listeners
                .get(&event.entity)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| (**handler)(event))).is_err() {
                tracing::warn!(
                    entity = %event.entity,
                    action = %event.action,
                    "event handler panicked; continuing with remaining handlers"
                );
            }
        }
        handlers.len()
    }

    /// Returns the number of handlers registered for an entity kind.
    pub fn listener_count(&self, entity: EntityKind) -> usize {
        self.inner
            .listeners
            .read()
            .get(&entity)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to a registered handler.
pub struct Subscription {
    inner: Weak<RegistryInner>,
    entity: EntityKind,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Detaches the handler. Idempotent: calling it more than once has
    /// no additional effect.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            let mut listeners = inner.listeners.write();
            if let Some(list) = listeners.get_mut(&self.entity) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }

    /// Returns true while the handler is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

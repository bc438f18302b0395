//! Connectivity tracking.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A connectivity state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The network became reachable.
    Online,
    /// The network became unreachable.
    Offline,
    /// The backend answered a reachability probe.
    BackendReachable,
    /// The backend stopped answering.
    BackendUnreachable,
}

type TransitionCallback = Arc<dyn Fn(Transition) + Send + Sync>;

/// Tracks the network-reachable and backend-reachable signals.
///
/// Transitions are edge-triggered: registered callbacks run exactly once
/// per state change, and setting an already-current state is a no-op.
/// Callbacks are invoked on the caller's thread, outside any monitor
/// lock, so a callback may itself flip the other signal.
///
/// A freshly constructed monitor assumes both signals are up; the
/// coordinator's startup probe corrects the backend signal immediately.
pub struct ConnectionMonitor {
    online: AtomicBool,
    backend_reachable: AtomicBool,
    callbacks: RwLock<Vec<TransitionCallback>>,
}

impl ConnectionMonitor {
    /// Creates a monitor with both signals up.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            backend_reachable: AtomicBool::new(true),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Returns true if the network is reachable.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Returns true if the backend answered the last probe.
    pub fn is_backend_reachable(&self) -> bool {
        self.backend_reachable.load(Ordering::SeqCst)
    }

    /// Registers a callback invoked on every transition.
    pub fn on_transition<F>(&self, callback: F)
    where
        F: Fn(Transition) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Updates the network signal, notifying on an actual edge.
    pub fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::SeqCst) != online {
            self.notify(if online {
                Transition::Online
            } else {
                Transition::Offline
            });
        }
    }

    /// Updates the backend signal, notifying on an actual edge.
    pub fn set_backend_reachable(&self, reachable: bool) {
        if self.backend_reachable.swap(reachable, Ordering::SeqCst) != reachable {
            self.notify(if reachable {
                Transition::BackendReachable
            } else {
                Transition::BackendUnreachable
            });
        }
    }

    fn notify(&self, transition: Transition) {
        tracing::debug!(?transition, "connectivity transition");
        let callbacks: Vec<TransitionCallback> = self.callbacks.read().clone();
        for callback in callbacks {
            (*callback)(transition);
        }
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

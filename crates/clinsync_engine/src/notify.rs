//! Out-of-band notification fan-out.

use clinsync_protocol::SyncNotification;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Distributes [`SyncNotification`]s to subscribers.
///
/// Each subscriber gets its own channel; disconnected subscribers are
/// dropped on the next emit.
pub struct NotificationHub {
    subscribers: RwLock<Vec<Sender<SyncNotification>>>,
}

impl NotificationHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to future notifications.
    pub fn subscribe(&self) -> Receiver<SyncNotification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a notification to all subscribers, pruning disconnected
    /// ones.
    pub fn emit(&self, notification: SyncNotification) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinsync_protocol::{EntityKind, Operation, WriteRequest};
    use serde_json::json;

    fn make_note() -> SyncNotification {
        SyncNotification::OperationDeadLettered {
            operation: Operation::from_request(
                EntityKind::Patients,
                WriteRequest::Create {
                    payload: json!({}),
                },
                0,
            ),
        }
    }

    #[test]
    fn emit_reaches_all_subscribers() {
        let hub = NotificationHub::new();
        let rx1 = hub.subscribe();
        let rx2 = hub.subscribe();

        let note = make_note();
        hub.emit(note.clone());

        assert_eq!(rx1.recv().unwrap(), note);
        assert_eq!(rx2.recv().unwrap(), note);
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let hub = NotificationHub::new();
        let rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        drop(rx);
        hub.emit(make_note());
        assert_eq!(hub.subscriber_count(), 0);
    }
}

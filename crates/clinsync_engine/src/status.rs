//! Aggregate sync health tracking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters for sync diagnostics.
///
/// All counters are atomic and can be read while operations are in
/// progress. The tracker holds only what cannot be derived on demand;
/// queue depth and connectivity flags come from their owning components
/// when a [`SyncStatus`] snapshot is assembled.
#[derive(Debug, Default)]
pub struct SyncStateTracker {
    writes_succeeded: AtomicU64,
    writes_failed: AtomicU64,
    conflicts_resolved: AtomicU64,
    operations_evicted: AtomicU64,
    operations_dead_lettered: AtomicU64,
    drains_completed: AtomicU64,
    events_published: AtomicU64,
    /// Epoch ms of the last completed drain; 0 means never.
    last_drain_at: AtomicU64,
}

impl SyncStateTracker {
    /// Creates a tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_write_succeeded(&self) {
        self.writes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict_resolved(&self) {
        self.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.operations_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_lettered(&self) {
        self.operations_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drain_completed(&self, at_ms: u64) {
        self.drains_completed.fetch_add(1, Ordering::Relaxed);
        self.last_drain_at.store(at_ms, Ordering::Relaxed);
    }

    pub(crate) fn record_event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of successful backend writes.
    pub fn writes_succeeded(&self) -> u64 {
        self.writes_succeeded.load(Ordering::Relaxed)
    }

    /// Returns the total number of failed write attempts.
    pub fn writes_failed(&self) -> u64 {
        self.writes_failed.load(Ordering::Relaxed)
    }

    /// Returns the total number of automatically resolved conflicts.
    pub fn conflicts_resolved(&self) -> u64 {
        self.conflicts_resolved.load(Ordering::Relaxed)
    }

    /// Returns the total number of operations evicted at capacity.
    pub fn operations_evicted(&self) -> u64 {
        self.operations_evicted.load(Ordering::Relaxed)
    }

    /// Returns the total number of dead-lettered operations.
    pub fn operations_dead_lettered(&self) -> u64 {
        self.operations_dead_lettered.load(Ordering::Relaxed)
    }

    /// Returns the total number of completed drains.
    pub fn drains_completed(&self) -> u64 {
        self.drains_completed.load(Ordering::Relaxed)
    }

    /// Returns the total number of events delivered to listeners.
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// Returns the time of the last completed drain, if any.
    pub fn last_drain_at(&self) -> Option<u64> {
        match self.last_drain_at.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }

    /// Assembles a point-in-time status snapshot from the counters and
    /// the caller-supplied component readings.
    pub fn status(
        &self,
        online: bool,
        backend_reachable: bool,
        queue_depth: usize,
        dead_letter_count: usize,
        active_subscriptions: usize,
    ) -> SyncStatus {
        SyncStatus {
            online,
            backend_reachable,
            queue_depth,
            dead_letter_count,
            active_subscriptions,
            last_drain_at: self.last_drain_at(),
            writes_succeeded: self.writes_succeeded(),
            writes_failed: self.writes_failed(),
            conflicts_resolved: self.conflicts_resolved(),
            operations_evicted: self.operations_evicted(),
            operations_dead_lettered: self.operations_dead_lettered(),
            drains_completed: self.drains_completed(),
            events_published: self.events_published(),
        }
    }
}

/// A point-in-time snapshot of sync health.
///
/// Recomputed on demand; reading it never blocks queue mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncStatus {
    /// Network reachability at snapshot time.
    pub online: bool,
    /// Backend reachability at snapshot time.
    pub backend_reachable: bool,
    /// Number of queued operations.
    pub queue_depth: usize,
    /// Number of dead-lettered operations.
    pub dead_letter_count: usize,
    /// Number of active change-stream subscriptions.
    pub active_subscriptions: usize,
    /// Time of the last completed drain, epoch ms.
    pub last_drain_at: Option<u64>,
    /// Total successful backend writes.
    pub writes_succeeded: u64,
    /// Total failed write attempts.
    pub writes_failed: u64,
    /// Total automatically resolved conflicts.
    pub conflicts_resolved: u64,
    /// Total operations evicted at capacity.
    pub operations_evicted: u64,
    /// Total dead-lettered operations.
    pub operations_dead_lettered: u64,
    /// Total completed drains.
    pub drains_completed: u64,
    /// Total events delivered to listeners.
    pub events_published: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let tracker = SyncStateTracker::new();
        assert_eq!(tracker.writes_succeeded(), 0);
        assert_eq!(tracker.last_drain_at(), None);
    }

    #[test]
    fn recording_accumulates() {
        let tracker = SyncStateTracker::new();

        tracker.record_write_succeeded();
        tracker.record_write_succeeded();
        tracker.record_write_failed();
        tracker.record_conflict_resolved();
        tracker.record_drain_completed(12_345);

        assert_eq!(tracker.writes_succeeded(), 2);
        assert_eq!(tracker.writes_failed(), 1);
        assert_eq!(tracker.conflicts_resolved(), 1);
        assert_eq!(tracker.drains_completed(), 1);
        assert_eq!(tracker.last_drain_at(), Some(12_345));
    }

    #[test]
    fn snapshot_combines_component_readings() {
        let tracker = SyncStateTracker::new();
        tracker.record_dead_lettered();
        tracker.record_eviction();
        tracker.record_event_published();

        let status = tracker.status(true, false, 7, 2, 5);
        assert!(status.online);
        assert!(!status.backend_reachable);
        assert_eq!(status.queue_depth, 7);
        assert_eq!(status.dead_letter_count, 2);
        assert_eq!(status.active_subscriptions, 5);
        assert_eq!(status.operations_dead_lettered, 1);
        assert_eq!(status.operations_evicted, 1);
        assert_eq!(status.events_published, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let tracker = Arc::new(SyncStateTracker::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let t = Arc::clone(&tracker);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    t.record_write_succeeded();
                    t.record_event_published();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tracker.writes_succeeded(), 800);
        assert_eq!(tracker.events_published(), 800);
    }
}

//! Configuration for the sync engine.

use clinsync_protocol::EntityKind;
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of queued operations. At capacity, the oldest
    /// operation is evicted to make room for a new one.
    pub queue_capacity: usize,
    /// Entity kinds to open change-stream subscriptions for.
    pub entities: Vec<EntityKind>,
    /// Retry behavior for failed writes and backend probes.
    pub retry: RetryConfig,
    /// Delay before re-opening a failed change-stream subscription.
    pub resubscribe_delay: Duration,
    /// Bound on each backend write or subscribe attempt. A timed-out
    /// attempt is treated as a transient network failure.
    pub request_timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration with the default values.
    pub fn new() -> Self {
        Self {
            queue_capacity: 100,
            entities: EntityKind::ALL.to_vec(),
            retry: RetryConfig::default(),
            resubscribe_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the tracked entity kinds.
    pub fn with_entities(mut self, entities: Vec<EntityKind>) -> Self {
        self.entities = entities;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the re-subscribe delay.
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
///
/// Delays follow `initial_delay * backoff_multiplier^retry_count`,
/// clamped to `max_delay`. The sequence is deterministic; there is no
/// jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of retries granted before an operation dead-letters.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with the given budget.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(32_000),
            backoff_multiplier: 2.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay for a retry of an operation that has had
    /// `retry_count` retries scheduled so far.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(retry_count.min(i32::MAX as u32) as i32);
        let clamped = base.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }

    /// Returns true if an operation with `retry_count` retries behind it
    /// has no budget left.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

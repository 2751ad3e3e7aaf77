// ABOUTME: Synchronization engine configuration
// ABOUTME: Defines tunable parameters for throttling, retry and shutdown

use std::time::Duration;

/// Configuration for the synchronization coordinator
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Minimum interval between allowed envelopes per throttled (event, scope) pair
    pub throttle_interval: Duration,
    /// Maximum delivery attempts before an outbox entry expires
    pub max_delivery_attempts: u32,
    /// Base delay for exponential retry backoff
    pub retry_backoff_base: Duration,
    /// How often the outbox worker polls for due entries
    pub worker_poll_interval: Duration,
    /// Pending-entry count above which the outbox sheds throttle-eligible events
    pub outbox_high_watermark: usize,
    /// How long shutdown waits for the outbox to drain before discarding
    pub shutdown_drain_timeout: Duration,
}

impl SyncConfig {
    /// Set the throttle interval
    pub fn throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    /// Set the maximum delivery attempts
    pub fn max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }

    /// Set the base retry backoff delay
    pub fn retry_backoff_base(mut self, base: Duration) -> Self {
        self.retry_backoff_base = base;
        self
    }

    /// Set the outbox worker poll interval
    pub fn worker_poll_interval(mut self, interval: Duration) -> Self {
        self.worker_poll_interval = interval;
        self
    }

    /// Set the outbox high watermark
    pub fn outbox_high_watermark(mut self, watermark: usize) -> Self {
        self.outbox_high_watermark = watermark;
        self
    }

    /// Set the shutdown drain timeout
    pub fn shutdown_drain_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_drain_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(500),
            max_delivery_attempts: 5,
            retry_backoff_base: Duration::from_millis(250),
            worker_poll_interval: Duration::from_millis(25),
            outbox_high_watermark: 10_000,
            shutdown_drain_timeout: Duration::from_secs(2),
        }
    }
}

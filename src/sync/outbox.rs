// ABOUTME: Pending-delivery queue providing at-least-once broadcast delivery
// ABOUTME: Background worker drains strictly in enqueue order with bounded retry

use crate::protocol::Envelope;
use crate::sync::router::RoomKey;
use crate::sync::transport::{EmitTarget, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Delivery state of an outbox entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting for a (re)attempt
    Pending,
    /// Pushed successfully; entry is discarded
    Delivered,
    /// Exceeded the maximum attempt count; entry is discarded
    Expired,
}

/// One envelope awaiting delivery, with retry bookkeeping
#[derive(Debug)]
pub struct OutboxEntry {
    /// The stamped envelope to deliver
    pub envelope: Envelope,
    /// Target room resolved at enqueue time
    pub room: RoomKey,
    /// Number of transport attempts made so far
    pub attempts: u32,
    /// Current delivery state
    pub state: DeliveryState,
    /// Earliest instant the next attempt may run
    next_attempt_at: Instant,
}

impl OutboxEntry {
    fn new(envelope: Envelope, room: RoomKey) -> Self {
        Self {
            envelope,
            room,
            attempts: 0,
            state: DeliveryState::Pending,
            next_attempt_at: Instant::now(),
        }
    }
}

/// Counters exposed for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutboxStats {
    /// Entries currently queued
    pub pending: usize,
    /// Entries delivered since process start
    pub delivered: u64,
    /// Entries expired since process start
    pub expired: u64,
}

/// Durable-in-memory queue of pending envelopes
///
/// Producers only ever enqueue; a single drain pass at a time (the background
/// worker, or a caller forcing an immediate flush) dequeues. Entries are
/// drained strictly in enqueue order: a failing head entry is retried in
/// place with exponential backoff and later entries never outrun it, so
/// delivered order matches enqueue order per scope even under retry.
pub struct Outbox {
    queue: Mutex<VecDeque<OutboxEntry>>,
    // Serializes drain passes so a forced flush can't race the worker
    drain_lock: tokio::sync::Mutex<()>,
    delivered: AtomicU64,
    expired: AtomicU64,
    saturated: AtomicBool,
    closed: AtomicBool,
    max_attempts: u32,
    backoff_base: Duration,
    high_watermark: usize,
}

impl Outbox {
    /// Create an empty outbox
    pub fn new(max_attempts: u32, backoff_base: Duration, high_watermark: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            drain_lock: tokio::sync::Mutex::new(()),
            delivered: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            saturated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            max_attempts: max_attempts.max(1),
            backoff_base,
            high_watermark,
        }
    }

    /// Enqueue an envelope for at-least-once delivery to `room`
    ///
    /// Never fails and never blocks on I/O. Above the high watermark the
    /// queue sheds throttle-eligible event classes (position/progress ticks)
    /// and keeps accepting everything else.
    pub fn add_event(&self, envelope: Envelope, room: RoomKey) {
        if self.closed.load(Ordering::SeqCst) {
            // Nothing drains anymore; a stranded entry would count as
            // pending forever
            log::debug!(
                "Outbox closed, dropping {} event {}",
                envelope.event_type,
                envelope.event_id
            );
            return;
        }
        let mut queue = self.queue.lock();
        if queue.len() >= self.high_watermark {
            if !self.saturated.swap(true, Ordering::SeqCst) {
                log::error!(
                    "Outbox saturated: {} entries pending, shedding throttled event classes",
                    queue.len()
                );
            }
            if envelope.event_type.is_throttle_eligible() {
                log::debug!(
                    "Shedding {} event {} under saturation",
                    envelope.event_type,
                    envelope.event_id
                );
                return;
            }
        } else if self.saturated.swap(false, Ordering::SeqCst) {
            log::info!("Outbox drained below high watermark, shedding stopped");
        }
        queue.push_back(OutboxEntry::new(envelope, room));
    }

    /// Delivery counters for observability
    pub fn get_stats(&self) -> OutboxStats {
        OutboxStats {
            pending: self.queue.lock().len(),
            delivered: self.delivered.load(Ordering::SeqCst),
            expired: self.expired.load(Ordering::SeqCst),
        }
    }

    /// Whether any entries are queued
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Run one drain pass: deliver due entries from the head until the queue
    /// is empty, the head is backing off, or the head fails its attempt
    ///
    /// Returns the number of entries delivered in this pass.
    pub async fn process_outbox(&self, transport: &dyn Transport) -> usize {
        let _guard = self.drain_lock.lock().await;
        let mut delivered = 0;

        loop {
            let popped = {
                let mut queue = self.queue.lock();
                match queue.front() {
                    Some(head) if head.next_attempt_at <= Instant::now() => queue.pop_front(),
                    _ => None,
                }
            };
            let Some(mut entry) = popped else { break };

            let wire = match entry.envelope.to_wire() {
                Ok(wire) => wire,
                Err(e) => {
                    // Undeliverable payload; drop it and keep the queue moving
                    log::warn!(
                        "Dropping unserializable envelope {} ({}): {}",
                        entry.envelope.event_id,
                        entry.envelope.event_type,
                        e
                    );
                    continue;
                }
            };

            entry.attempts += 1;
            let result = transport
                .emit(
                    entry.envelope.event_type.as_str(),
                    &wire,
                    &EmitTarget::Room(entry.room.clone()),
                )
                .await;

            match result {
                Ok(()) => {
                    entry.state = DeliveryState::Delivered;
                    self.delivered.fetch_add(1, Ordering::SeqCst);
                    delivered += 1;
                    log::debug!(
                        "Delivered {} seq {} to {} (attempt {})",
                        entry.envelope.event_type,
                        entry.envelope.server_seq,
                        entry.room,
                        entry.attempts
                    );
                }
                Err(e) if entry.attempts >= self.max_attempts => {
                    entry.state = DeliveryState::Expired;
                    self.expired.fetch_add(1, Ordering::SeqCst);
                    log::warn!(
                        "Expiring envelope {} ({} seq {}) after {} attempts: {}",
                        entry.envelope.event_id,
                        entry.envelope.event_type,
                        entry.envelope.server_seq,
                        entry.attempts,
                        e
                    );
                }
                Err(e) => {
                    // Strict FIFO: the head backs off in place, this pass ends
                    let backoff = self.backoff_for(entry.attempts);
                    log::debug!(
                        "Transport push failed for {} (attempt {}), retrying in {:?}: {}",
                        entry.envelope.event_id,
                        entry.attempts,
                        backoff,
                        e
                    );
                    entry.next_attempt_at = Instant::now() + backoff;
                    self.queue.lock().push_front(entry);
                    break;
                }
            }
        }

        delivered
    }

    /// Refuse all further enqueues; late producers and deferred throttle
    /// flushes become no-ops
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Best-effort drain until empty or `deadline`, used at shutdown
    pub async fn drain_until(&self, transport: &dyn Transport, deadline: Instant) -> usize {
        let mut delivered = 0;
        while !self.is_empty() && Instant::now() < deadline {
            delivered += self.process_outbox(transport).await;
            if !self.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        let remaining = self.get_stats().pending;
        if remaining > 0 {
            log::warn!("Shutdown drain discarded {} undelivered entries", remaining);
            self.queue.lock().clear();
        }
        delivered
    }

    fn backoff_for(&self, attempts: u32) -> Duration {
        // Exponential, capped so the shift can't overflow
        let exponent = attempts.saturating_sub(1).min(10);
        self.backoff_base.saturating_mul(1 << exponent)
    }
}

/// Spawn the background delivery worker
///
/// Returns the task handle and a shutdown sender; sending `true` stops the
/// loop after the current pass.
pub fn spawn_outbox_worker(
    outbox: Arc<Outbox>,
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!("Outbox worker started, polling every {:?}", poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    outbox.process_outbox(transport.as_ref()).await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        log::info!("Outbox worker shutting down");
                        break;
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventType;
    use crate::sync::transport::EmitTarget;
    use crate::{error::Error, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// Transport scripted to fail a fixed number of times before succeeding
    struct FlakyTransport {
        failures_left: Mutex<u32>,
        successes: AtomicU64,
    }

    impl FlakyTransport {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: Mutex::new(times),
                successes: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn emit(&self, _event: &str, _envelope: &Value, _target: &EmitTarget) -> Result<()> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(Error::Transport("simulated failure".to_string()));
            }
            self.successes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn join_room(&self, _client_id: &str, _room: &RoomKey) -> Result<()> {
            Ok(())
        }

        async fn leave_room(&self, _client_id: &str, _room: &RoomKey) -> Result<()> {
            Ok(())
        }
    }

    fn envelope(seq: u64) -> Envelope {
        Envelope::new(EventType::PlayerState, seq, json!({"playing": true}))
    }

    #[tokio::test]
    async fn test_delivery_success_removes_entry() {
        let outbox = Outbox::new(3, Duration::from_millis(1), 100);
        let transport = FlakyTransport::failing(0);

        outbox.add_event(envelope(1), RoomKey::Global);
        assert_eq!(outbox.get_stats().pending, 1);

        let delivered = outbox.process_outbox(&transport).await;
        assert_eq!(delivered, 1);

        let stats = outbox.get_stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.expired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let outbox = Outbox::new(5, Duration::from_millis(10), 100);
        let transport = FlakyTransport::failing(2);

        outbox.add_event(envelope(1), RoomKey::Global);

        // Two failing passes, each ending with the head backing off
        for _ in 0..2 {
            assert_eq!(outbox.process_outbox(&transport).await, 0);
            tokio::time::advance(Duration::from_millis(50)).await;
        }

        assert_eq!(outbox.process_outbox(&transport).await, 1);
        assert_eq!(transport.successes.load(Ordering::SeqCst), 1);

        let stats = outbox.get_stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.expired, 0, "Entry must not expire on eventual success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_expires_entry() {
        let outbox = Outbox::new(3, Duration::from_millis(10), 100);
        let transport = FlakyTransport::failing(u32::MAX);

        outbox.add_event(envelope(1), RoomKey::Global);

        for _ in 0..5 {
            outbox.process_outbox(&transport).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        let stats = outbox.get_stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.expired, 1);
        // No further attempts happen once expired
        assert_eq!(outbox.process_outbox(&transport).await, 0);
        assert_eq!(outbox.get_stats().expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_fifo_head_blocks_later_entries() {
        let outbox = Outbox::new(5, Duration::from_millis(10), 100);
        let transport = FlakyTransport::failing(1);

        outbox.add_event(envelope(1), RoomKey::Global);
        outbox.add_event(envelope(2), RoomKey::Global);

        // First pass: head fails and backs off; entry 2 must not jump ahead
        assert_eq!(outbox.process_outbox(&transport).await, 0);
        assert_eq!(outbox.get_stats().pending, 2);
        assert_eq!(transport.successes.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(outbox.process_outbox(&transport).await, 2);
        assert_eq!(transport.successes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_outbox_refuses_new_entries() {
        let outbox = Outbox::new(3, Duration::from_millis(1), 100);

        outbox.add_event(envelope(1), RoomKey::Global);
        outbox.close();
        outbox.add_event(envelope(2), RoomKey::Global);

        // Entries queued before close still drain; late ones are dropped
        assert_eq!(outbox.get_stats().pending, 1);
        let transport = FlakyTransport::failing(0);
        assert_eq!(outbox.process_outbox(&transport).await, 1);
        assert_eq!(outbox.get_stats().pending, 0);
    }

    #[tokio::test]
    async fn test_saturation_sheds_throttled_classes_only() {
        let outbox = Outbox::new(3, Duration::from_millis(1), 2);

        outbox.add_event(envelope(1), RoomKey::Global);
        outbox.add_event(envelope(2), RoomKey::Global);
        // Watermark reached: position ticks are shed, state changes kept
        outbox.add_event(
            Envelope::new(EventType::PlayerPosition, 3, json!({"position": 12.5})),
            RoomKey::Global,
        );
        outbox.add_event(envelope(4), RoomKey::Global);

        assert_eq!(outbox.get_stats().pending, 3);
    }
}

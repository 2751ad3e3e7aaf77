// ABOUTME: Synchronization coordinator, the single public entry point
// ABOUTME: Stamps, throttles, enqueues and routes state-change envelopes

use crate::protocol::{Envelope, EventType, RoutingClass};
use crate::sync::config::SyncConfig;
use crate::sync::outbox::{spawn_outbox_worker, Outbox, OutboxStats};
use crate::sync::router::{routes_for, RoomKey};
use crate::sync::sequence::SequenceGenerator;
use crate::sync::snapshot::SnapshotService;
use crate::sync::throttle::{GateDecision, ThrottleGate, ThrottleKey};
use crate::sync::transport::{DataProvider, EmitTarget, Transport};
use crate::Result;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Coordinates ordered, at-least-once state broadcasts to connected observers
///
/// Constructed once per process and injected by reference into every producing
/// service (player control, playlist edits, NFC workflow, upload workflow).
/// There is no ambient singleton: the coordinator owns the sequence counters,
/// the throttle gate and the outbox, and merely references the transport and
/// data-provider collaborators.
pub struct SyncCoordinator {
    config: SyncConfig,
    sequences: Arc<SequenceGenerator>,
    throttle: Arc<ThrottleGate>,
    outbox: Arc<Outbox>,
    snapshots: SnapshotService,
    transport: Arc<dyn Transport>,
    worker: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl SyncCoordinator {
    /// Create a coordinator over the given transport and data provider
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        provider: Arc<dyn DataProvider>,
    ) -> Self {
        let sequences = Arc::new(SequenceGenerator::new());
        let outbox = Arc::new(Outbox::new(
            config.max_delivery_attempts,
            config.retry_backoff_base,
            config.outbox_high_watermark,
        ));
        let snapshots = SnapshotService::new(
            Arc::clone(&sequences),
            provider,
            Arc::clone(&transport),
        );

        Self {
            throttle: Arc::new(ThrottleGate::new(config.throttle_interval)),
            config,
            sequences,
            outbox,
            snapshots,
            transport,
            worker: Mutex::new(None),
        }
    }

    /// Start the background delivery worker
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            log::warn!("Outbox worker already running");
            return;
        }
        *worker = Some(spawn_outbox_worker(
            Arc::clone(&self.outbox),
            Arc::clone(&self.transport),
            self.config.worker_poll_interval,
        ));
    }

    /// Broadcast a state change to every observer of the matching room(s)
    ///
    /// Fire-and-forget for the caller: transport failures are absorbed by the
    /// outbox retry loop and never surface here. Returns the stamped envelope,
    /// or `None` when the throttle gate suppressed the update (a no-op, not
    /// an error; the freshest suppressed value is flushed once the interval
    /// elapses).
    ///
    /// With `immediate`, a synchronous flush pass runs right away so the
    /// envelope reaches observers without waiting for the next worker tick;
    /// the outbox stays the safety net if that optimistic pass fails.
    pub async fn broadcast_state_change(
        &self,
        event_type: EventType,
        payload: Value,
        scope_id: Option<&str>,
        immediate: bool,
    ) -> Option<Envelope> {
        if event_type.routing_class() == RoutingClass::Direct {
            log::warn!(
                "Ignoring broadcast of direct-only event type {}",
                event_type
            );
            return None;
        }

        let mut envelope = Envelope::new(event_type, self.sequences.next_global(), payload);
        if event_type.is_scoped() {
            match scope_id {
                Some(id) => {
                    envelope = envelope.with_scope(id, self.sequences.next_scope(id));
                }
                None => {
                    log::warn!(
                        "Scoped event {} broadcast without a scope id, routing to global room",
                        event_type
                    );
                }
            }
        }

        if event_type.is_throttle_eligible() {
            let key: ThrottleKey = (event_type, scope_id.map(str::to_string));
            envelope = match self.throttle.check(key.clone(), envelope) {
                GateDecision::Pass(envelope) => envelope,
                GateDecision::Suppressed => return None,
                GateDecision::SuppressedScheduleFlush(delay) => {
                    self.schedule_throttle_flush(key, delay);
                    return None;
                }
            };
        }

        self.enqueue(&envelope, scope_id);

        if immediate {
            self.outbox.process_outbox(self.transport.as_ref()).await;
        }

        Some(envelope)
    }

    /// Send a point-to-point command acknowledgment to one client
    ///
    /// Acknowledgments are not part of the ordered broadcast stream: they are
    /// stamped with the current global sequence without incrementing it, never
    /// touch the outbox, and are never retried: a client that misses its ack
    /// times out and re-issues the command, so retrying here could double-
    /// apply a non-idempotent command result. This is the one path that
    /// reports transport failure to its caller.
    pub async fn send_acknowledgment(
        &self,
        client_op_id: &str,
        success: bool,
        data: Value,
        target_client: &str,
    ) -> Result<Envelope> {
        let event_type = if success {
            EventType::CommandSuccess
        } else {
            EventType::CommandError
        };
        let payload = if success {
            json!({"client_op_id": client_op_id, "success": true, "data": data})
        } else {
            json!({"client_op_id": client_op_id, "success": false, "error": data})
        };

        let envelope = Envelope::new(event_type, self.sequences.current_global(), payload);
        let wire = envelope.to_wire()?;
        self.transport
            .emit(
                event_type.as_str(),
                &wire,
                &EmitTarget::Client(target_client.to_string()),
            )
            .await?;

        log::debug!(
            "Acknowledged op {} (success={}) to client {}",
            client_op_id,
            success,
            target_client
        );
        Ok(envelope)
    }

    /// Subscribe a client to a room and push its reconciliation snapshot
    pub async fn subscribe(&self, client_id: &str, room: &RoomKey) -> Result<Envelope> {
        self.snapshots.subscribe(client_id, room).await
    }

    /// Unsubscribe a client from a room
    pub async fn unsubscribe(&self, client_id: &str, room: &RoomKey) -> Result<()> {
        self.snapshots.unsubscribe(client_id, room).await
    }

    /// Delivery counters for observability
    pub fn outbox_stats(&self) -> OutboxStats {
        self.outbox.get_stats()
    }

    /// The coordinator's sequence counters (read access for reconciliation)
    pub fn sequences(&self) -> &SequenceGenerator {
        &self.sequences
    }

    /// Stop the worker and drain the outbox best-effort within the configured
    /// timeout, then discard whatever is left
    pub async fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some((handle, shutdown_tx)) = worker {
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
        }

        // Seal the queue before draining so a deferred throttle flush firing
        // after shutdown can't strand an entry nothing will ever deliver
        self.outbox.close();
        let deadline = Instant::now() + self.config.shutdown_drain_timeout;
        let delivered = self
            .outbox
            .drain_until(self.transport.as_ref(), deadline)
            .await;
        log::info!("Shutdown drain delivered {} entries", delivered);
    }

    fn enqueue(&self, envelope: &Envelope, scope_id: Option<&str>) {
        for room in routes_for(envelope.event_type, scope_id) {
            self.outbox.add_event(envelope.clone(), room);
        }
    }

    fn schedule_throttle_flush(&self, key: ThrottleKey, delay: std::time::Duration) {
        let gate = Arc::clone(&self.throttle);
        let outbox = Arc::clone(&self.outbox);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(envelope) = gate.take_pending(&key) {
                let scope = envelope.playlist_id.clone();
                for room in routes_for(envelope.event_type, scope.as_deref()) {
                    outbox.add_event(envelope.clone(), room);
                }
            }
        });
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        // shutdown() is the graceful path; this stops a worker leaked past it
        if let Some((handle, shutdown_tx)) = self.worker.lock().take() {
            let _ = shutdown_tx.send(true);
            handle.abort();
        }
    }
}

// ABOUTME: Rate limiter for high-frequency event classes
// ABOUTME: Latest-wins suppression with a deferred flush per (event, scope) pair

use crate::protocol::{Envelope, EventType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Key identifying one throttled stream of updates
pub type ThrottleKey = (EventType, Option<String>);

#[derive(Debug)]
struct Slot {
    last_allowed: Option<Instant>,
    pending: Option<Envelope>,
    flush_scheduled: bool,
}

/// Outcome of offering an envelope to the gate
#[derive(Debug)]
pub enum GateDecision {
    /// Envelope passes; enqueue it now
    Pass(Envelope),
    /// Envelope stored as the latest pending value; a flush is already due
    Suppressed,
    /// Envelope stored as the latest pending value; the caller must schedule
    /// a flush after the given delay
    SuppressedScheduleFlush(Duration),
}

/// Per-(event_type, scope) rate limiter
///
/// Intermediate values are discarded, not buffered: the gate keeps only the
/// single freshest suppressed envelope per key and releases it once the
/// interval has elapsed, so the most recent update is always eventually
/// represented while transport load stays bounded.
#[derive(Debug)]
pub struct ThrottleGate {
    interval: Duration,
    slots: Mutex<HashMap<ThrottleKey, Slot>>,
}

impl ThrottleGate {
    /// Create a gate enforcing `interval` between allowed envelopes per key
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Offer an envelope; either it passes or it becomes the pending latest
    pub fn check(&self, key: ThrottleKey, envelope: Envelope) -> GateDecision {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let slot = slots.entry(key).or_insert(Slot {
            last_allowed: None,
            pending: None,
            flush_scheduled: false,
        });

        match slot.last_allowed {
            Some(last) if now.duration_since(last) < self.interval => {
                slot.pending = Some(envelope);
                if slot.flush_scheduled {
                    GateDecision::Suppressed
                } else {
                    slot.flush_scheduled = true;
                    GateDecision::SuppressedScheduleFlush(last + self.interval - now)
                }
            }
            _ => {
                slot.last_allowed = Some(now);
                // The newest value passes; an older pending one is superseded
                slot.pending = None;
                GateDecision::Pass(envelope)
            }
        }
    }

    /// Take the pending envelope for a key, if any, marking it allowed now
    ///
    /// Called by the deferred flush task once its delay elapses.
    pub fn take_pending(&self, key: &ThrottleKey) -> Option<Envelope> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(key)?;
        slot.flush_scheduled = false;
        let envelope = slot.pending.take()?;
        slot.last_allowed = Some(Instant::now());
        Some(envelope)
    }
}

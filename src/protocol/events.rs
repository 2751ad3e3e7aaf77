// ABOUTME: Event type definitions and envelope schema
// ABOUTME: Supports player/state, playlist/updated, state/snapshot, etc.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Fixed wire names for the acknowledgment reply path
pub mod ack {
    /// Event name for a successful command acknowledgment
    pub const SUCCESS: &str = "command/success";
    /// Event name for a failed command acknowledgment
    pub const ERROR: &str = "command/error";
}

/// How an event type is addressed at the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingClass {
    /// Always routed to the single fixed broadcast room
    Global,
    /// Routed to a room keyed by the event's scope id (`playlist:{id}`)
    Scoped,
    /// Sent only to one explicit client; never valid for broadcasts
    Direct,
}

/// Closed set of state-change event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Player transport state changed (playing/paused/stopped, current track)
    #[serde(rename = "player/state")]
    PlayerState,

    /// Playback position tick (high-frequency, throttled)
    #[serde(rename = "player/position")]
    PlayerPosition,

    /// The set of playlists changed (created/deleted/renamed)
    #[serde(rename = "playlists/changed")]
    PlaylistsChanged,

    /// A single playlist's metadata changed
    #[serde(rename = "playlist/updated")]
    PlaylistUpdated,

    /// A playlist's track list changed (add/remove/reorder)
    #[serde(rename = "playlist/tracks")]
    TracksChanged,

    /// NFC tag-association workflow progressed
    #[serde(rename = "nfc/association")]
    NfcAssociation,

    /// Upload progress tick (high-frequency, throttled)
    #[serde(rename = "upload/progress")]
    UploadProgress,

    /// Full-state snapshot for a newly subscribed client
    #[serde(rename = "state/snapshot")]
    StateSnapshot,

    /// Successful command acknowledgment (direct reply)
    #[serde(rename = "command/success")]
    CommandSuccess,

    /// Failed command acknowledgment (direct reply)
    #[serde(rename = "command/error")]
    CommandError,
}

impl EventType {
    /// Wire name of this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PlayerState => "player/state",
            EventType::PlayerPosition => "player/position",
            EventType::PlaylistsChanged => "playlists/changed",
            EventType::PlaylistUpdated => "playlist/updated",
            EventType::TracksChanged => "playlist/tracks",
            EventType::NfcAssociation => "nfc/association",
            EventType::UploadProgress => "upload/progress",
            EventType::StateSnapshot => "state/snapshot",
            EventType::CommandSuccess => ack::SUCCESS,
            EventType::CommandError => ack::ERROR,
        }
    }

    /// Routing class of this event type (static table, configured at startup)
    pub fn routing_class(&self) -> RoutingClass {
        match self {
            EventType::PlayerState
            | EventType::PlayerPosition
            | EventType::PlaylistsChanged
            | EventType::NfcAssociation
            | EventType::UploadProgress => RoutingClass::Global,
            EventType::PlaylistUpdated | EventType::TracksChanged => RoutingClass::Scoped,
            EventType::StateSnapshot | EventType::CommandSuccess | EventType::CommandError => {
                RoutingClass::Direct
            }
        }
    }

    /// Whether this event type carries a per-scope sequence number
    pub fn is_scoped(&self) -> bool {
        self.routing_class() == RoutingClass::Scoped
    }

    /// Whether this event type passes through the throttle gate
    pub fn is_throttle_eligible(&self) -> bool {
        matches!(self, EventType::PlayerPosition | EventType::UploadProgress)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fully stamped, ordered, timestamped unit of state news
///
/// Wire shape (JSON):
///
/// ```text
/// {
///   "event_type": "playlist/tracks",
///   "server_seq": 42,
///   "data": { "tracks": [...], "playlist_seq": 7 },
///   "timestamp": 1735689600123,
///   "event_id": "7f3a…",
///   "playlist_id": "abc"          // scoped events only
/// }
/// ```
///
/// `scope_seq` is not serialized as its own field; scoped envelopes embed it
/// inside `data` as `playlist_seq` so clients reconcile against one object.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// What changed
    pub event_type: EventType,
    /// Globally monotonic sequence number, strictly increasing per process
    pub server_seq: u64,
    /// Opaque structured payload specific to `event_type`
    pub data: Value,
    /// Emission time, epoch milliseconds
    pub timestamp: i64,
    /// Process-unique identifier for log correlation and dedup probing
    pub event_id: String,
    /// Scope key for routing, present only for scoped events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    /// Per-scope sequence number; mirrored into `data` as `playlist_seq`
    #[serde(skip)]
    pub scope_seq: Option<u64>,
}

impl Envelope {
    /// Build an unscoped envelope stamped with the given global sequence
    pub fn new(event_type: EventType, server_seq: u64, data: Value) -> Self {
        Self {
            event_type,
            server_seq,
            data,
            timestamp: epoch_millis(),
            event_id: Uuid::new_v4().to_string(),
            playlist_id: None,
            scope_seq: None,
        }
    }

    /// Attach scope addressing and mirror `playlist_seq` into the payload
    pub fn with_scope(mut self, playlist_id: impl Into<String>, scope_seq: u64) -> Self {
        self.playlist_id = Some(playlist_id.into());
        self.scope_seq = Some(scope_seq);
        if let Value::Object(ref mut map) = self.data {
            map.insert("playlist_seq".to_string(), Value::from(scope_seq));
        }
        self
    }

    /// Serialize to the wire JSON object
    pub fn to_wire(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Current time as epoch milliseconds
pub(crate) fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(EventType::PlayerState.as_str(), "player/state");
        assert_eq!(EventType::TracksChanged.as_str(), "playlist/tracks");
        assert_eq!(
            serde_json::to_string(&EventType::PlayerPosition).unwrap(),
            "\"player/position\""
        );
    }

    #[test]
    fn test_routing_classes() {
        assert_eq!(EventType::PlayerState.routing_class(), RoutingClass::Global);
        assert_eq!(
            EventType::PlaylistUpdated.routing_class(),
            RoutingClass::Scoped
        );
        assert_eq!(
            EventType::CommandSuccess.routing_class(),
            RoutingClass::Direct
        );
        assert!(EventType::PlayerPosition.is_throttle_eligible());
        assert!(!EventType::PlayerState.is_throttle_eligible());
    }

    #[test]
    fn test_unscoped_envelope_has_no_scope_fields() {
        let envelope = Envelope::new(EventType::PlayerState, 5, json!({"playing": true}));
        let wire = envelope.to_wire().unwrap();

        assert_eq!(wire["server_seq"], 5);
        assert_eq!(wire["data"]["playing"], true);
        assert!(wire.get("playlist_id").is_none());
        assert!(wire["data"].get("playlist_seq").is_none());
    }

    #[test]
    fn test_scoped_envelope_embeds_playlist_seq() {
        let envelope = Envelope::new(EventType::TracksChanged, 9, json!({"tracks": []}))
            .with_scope("abc", 3);
        let wire = envelope.to_wire().unwrap();

        assert_eq!(wire["playlist_id"], "abc");
        assert_eq!(wire["data"]["playlist_seq"], 3);
        // scope_seq itself never appears as a top-level wire field
        assert!(wire.get("scope_seq").is_none());
    }
}

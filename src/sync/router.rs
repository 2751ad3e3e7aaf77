// ABOUTME: Room routing for multicast addressing
// ABOUTME: Maps event types and scope ids to transport-level room keys

use crate::protocol::{EventType, RoutingClass};
use crate::{error::Error, Result};

/// Transport-level multicast group key
///
/// Rooms are the unit of broadcast addressing: zero or more clients join a
/// room and every room-targeted emit fans out to its members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// The single fixed broadcast room every observer joins
    Global,
    /// Per-playlist room for scoped detail events
    Playlist(String),
    /// A single client's direct session; used only by acknowledgment and
    /// snapshot paths, never by broadcasts
    Client(String),
}

impl RoomKey {
    /// Render the transport-level room name
    pub fn as_room_name(&self) -> String {
        match self {
            RoomKey::Global => "global".to_string(),
            RoomKey::Playlist(id) => format!("playlist:{}", id),
            RoomKey::Client(id) => format!("client:{}", id),
        }
    }

    /// Parse an inbound room name from a subscribe command
    ///
    /// Unknown names are rejected as [`Error::UnknownRoom`]. Client rooms are
    /// not parseable on purpose: subscribers can only ever name broadcast
    /// rooms.
    pub fn parse(name: &str) -> Result<RoomKey> {
        if name == "global" {
            return Ok(RoomKey::Global);
        }
        match name.strip_prefix("playlist:") {
            Some(id) if !id.is_empty() => Ok(RoomKey::Playlist(id.to_string())),
            _ => Err(Error::UnknownRoom(name.to_string())),
        }
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_room_name())
    }
}

/// Resolve the broadcast room(s) for an event
///
/// Pure static mapping, safe for concurrent use. Direct-class event types
/// have no broadcast rooms at all; a scoped event with a missing scope id
/// degrades to the global room (the caller logs that case).
pub fn routes_for(event_type: EventType, scope_id: Option<&str>) -> Vec<RoomKey> {
    match event_type.routing_class() {
        RoutingClass::Global => vec![RoomKey::Global],
        RoutingClass::Scoped => match scope_id {
            Some(id) => vec![RoomKey::Playlist(id.to_string())],
            None => vec![RoomKey::Global],
        },
        RoutingClass::Direct => Vec::new(),
    }
}

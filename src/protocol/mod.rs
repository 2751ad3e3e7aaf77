// ABOUTME: Protocol module for jukesync
// ABOUTME: Wire-level event types and the stamped envelope schema

mod events;

pub use events::{ack, Envelope, EventType, RoutingClass};

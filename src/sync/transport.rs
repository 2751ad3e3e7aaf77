// ABOUTME: Transport and data-provider collaborator traits
// ABOUTME: Narrow seams between the sync engine and the surrounding application

use crate::sync::router::RoomKey;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Where an emit is addressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitTarget {
    /// Fan out to every member of a room
    Room(RoomKey),
    /// Push to a single client's session only
    Client(String),
}

/// Push-side collaborator that actually moves bytes to clients
///
/// Implementations wrap whatever multiplexed transport the application uses
/// (WebSocket sessions, Socket.IO, an in-process registry). `emit` failures
/// are treated as transient; the outbox retries room-targeted pushes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Push one serialized envelope to a room or a single client
    async fn emit(&self, event_name: &str, envelope: &Value, target: &EmitTarget) -> Result<()>;

    /// Add a client to a room's membership
    async fn join_room(&self, client_id: &str, room: &RoomKey) -> Result<()>;

    /// Remove a client from a room's membership
    async fn leave_room(&self, client_id: &str, room: &RoomKey) -> Result<()>;
}

/// Read-side collaborator the snapshot service queries for full-state views
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Current full state for a room, or `None` when nothing exists yet
    ///
    /// Errors and `None` both degrade to the room's empty baseline snapshot;
    /// a subscription never fails because the provider is unavailable.
    async fn full_state(&self, room: &RoomKey) -> Result<Option<Value>>;
}

/// Provider with no backing state; every snapshot degrades to its empty
/// baseline. Useful for tests and for embedders that wire real providers
/// later.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyProvider;

#[async_trait]
impl DataProvider for EmptyProvider {
    async fn full_state(&self, _room: &RoomKey) -> Result<Option<Value>> {
        Ok(None)
    }
}

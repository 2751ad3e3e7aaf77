// ABOUTME: In-process client registry and loopback transport
// ABOUTME: Thread-safe session map with room membership and fanout delivery

use crate::sync::router::RoomKey;
use crate::sync::transport::{EmitTarget, Transport};
use crate::{error::Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// Unique client identifier
pub type ClientId = String;

/// One message pushed to a connected client
#[derive(Debug, Clone)]
pub struct PushMessage {
    /// Wire event name (e.g. "playlist/tracks")
    pub event: String,
    /// Serialized envelope
    pub envelope: Value,
}

/// A connected client session
#[derive(Debug)]
struct ConnectedClient {
    /// Channel to this client's session task
    tx: mpsc::UnboundedSender<PushMessage>,
}

/// Thread-safe registry of connected clients with room membership
///
/// Serves as the in-process [`Transport`]: room emits fan out to members,
/// client emits go straight to one session's channel. The surrounding
/// application forwards each receiver's messages onto the real socket.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ConnectedClient>>,
    rooms: RwLock<HashMap<RoomKey, HashSet<ClientId>>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and return the receiving end of its push channel
    pub fn add_client(&self, client_id: impl Into<ClientId>) -> mpsc::UnboundedReceiver<PushMessage> {
        let client_id = client_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients
            .write()
            .insert(client_id.clone(), ConnectedClient { tx });
        log::info!(
            "Client {} added, total clients: {}",
            client_id,
            self.client_count()
        );
        rx
    }

    /// Remove a client and drop it from every room
    pub fn remove_client(&self, client_id: &str) {
        let removed = self.clients.write().remove(client_id).is_some();
        let mut rooms = self.rooms.write();
        for members in rooms.values_mut() {
            members.remove(client_id);
        }
        rooms.retain(|_, members| !members.is_empty());
        if removed {
            log::info!(
                "Client {} removed, total clients: {}",
                client_id,
                self.client_count()
            );
        }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Members of a room
    pub fn room_members(&self, room: &RoomKey) -> Vec<ClientId> {
        self.rooms
            .read()
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a client is currently connected
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients.read().contains_key(client_id)
    }

    fn send_to_client(&self, client_id: &str, msg: PushMessage) -> Result<()> {
        let clients = self.clients.read();
        let client = clients
            .get(client_id)
            .ok_or_else(|| Error::Transport(format!("client {} not connected", client_id)))?;
        client
            .tx
            .send(msg)
            .map_err(|_| Error::Transport(format!("client {} channel closed", client_id)))
    }
}

#[async_trait]
impl Transport for ClientRegistry {
    async fn emit(&self, event_name: &str, envelope: &Value, target: &EmitTarget) -> Result<()> {
        let msg = PushMessage {
            event: event_name.to_string(),
            envelope: envelope.clone(),
        };
        match target {
            EmitTarget::Client(client_id) => self.send_to_client(client_id, msg),
            EmitTarget::Room(room) => {
                // Individual stale sessions don't fail a room fanout; an
                // empty room is a successful no-op.
                for member in self.room_members(room) {
                    if self.send_to_client(&member, msg.clone()).is_err() {
                        log::debug!("Dropping emit to stale session {}", member);
                    }
                }
                Ok(())
            }
        }
    }

    async fn join_room(&self, client_id: &str, room: &RoomKey) -> Result<()> {
        if !self.is_connected(client_id) {
            return Err(Error::Transport(format!(
                "client {} not connected",
                client_id
            )));
        }
        self.rooms
            .write()
            .entry(room.clone())
            .or_default()
            .insert(client_id.to_string());
        log::debug!("Client {} joined room {}", client_id, room);
        Ok(())
    }

    async fn leave_room(&self, client_id: &str, room: &RoomKey) -> Result<()> {
        let mut rooms = self.rooms.write();
        if let Some(members) = rooms.get_mut(room) {
            members.remove(client_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
        log::debug!("Client {} left room {}", client_id, room);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_registry_membership() {
        let registry = Arc::new(ClientRegistry::new());
        let _rx = registry.add_client("c1");
        assert_eq!(registry.client_count(), 1);

        registry.join_room("c1", &RoomKey::Global).await.unwrap();
        assert_eq!(registry.room_members(&RoomKey::Global), vec!["c1"]);

        registry.remove_client("c1");
        assert_eq!(registry.client_count(), 0);
        assert!(registry.room_members(&RoomKey::Global).is_empty());
    }

    #[tokio::test]
    async fn test_room_fanout_skips_non_members() {
        let registry = Arc::new(ClientRegistry::new());
        let mut rx_in = registry.add_client("inside");
        let mut rx_out = registry.add_client("outside");
        registry.join_room("inside", &RoomKey::Global).await.unwrap();

        registry
            .emit(
                "player/state",
                &json!({"server_seq": 1}),
                &EmitTarget::Room(RoomKey::Global),
            )
            .await
            .unwrap();

        let msg = rx_in.try_recv().unwrap();
        assert_eq!(msg.event, "player/state");
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_direct_emit_to_unknown_client_fails() {
        let registry = Arc::new(ClientRegistry::new());
        let result = registry
            .emit(
                "command/success",
                &json!({}),
                &EmitTarget::Client("ghost".to_string()),
            )
            .await;
        assert!(result.is_err());
    }
}

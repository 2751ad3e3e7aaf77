// ABOUTME: Snapshot service for late-subscriber reconciliation
// ABOUTME: Joins a client to a room and pushes one stamped full-state envelope

use crate::protocol::{Envelope, EventType};
use crate::sync::router::RoomKey;
use crate::sync::sequence::SequenceGenerator;
use crate::sync::transport::{DataProvider, EmitTarget, Transport};
use crate::{error::Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;

/// Emits one full-state snapshot to each newly (re)subscribed client
///
/// Snapshots are stamped with the *current* sequence numbers, not fresh ones:
/// they are a reconciliation baseline, not part of the ordered broadcast
/// stream. A client compares incremental envelopes against the snapshot's
/// stamp and discards anything older.
pub struct SnapshotService {
    sequences: Arc<SequenceGenerator>,
    provider: Arc<dyn DataProvider>,
    transport: Arc<dyn Transport>,
}

impl SnapshotService {
    /// Create a snapshot service over the given collaborators
    pub fn new(
        sequences: Arc<SequenceGenerator>,
        provider: Arc<dyn DataProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            sequences,
            provider,
            transport,
        }
    }

    /// Join `client_id` to `room` and push its reconciliation snapshot
    ///
    /// The snapshot goes to this client only; other room members see nothing.
    /// A missing or failing data provider degrades to the room's empty
    /// baseline so the subscriber always gets a deterministic starting point.
    /// Dropping the returned future cancels the in-flight provider query.
    pub async fn subscribe(&self, client_id: &str, room: &RoomKey) -> Result<Envelope> {
        if let RoomKey::Client(_) = room {
            return Err(Error::UnknownRoom(room.as_room_name()));
        }

        self.transport.join_room(client_id, room).await?;

        let state = match self.provider.full_state(room).await {
            Ok(state) => state,
            Err(e) => {
                log::warn!(
                    "Data provider failed for room {}, sending empty snapshot: {}",
                    room,
                    e
                );
                None
            }
        };
        let data = state.unwrap_or_else(|| empty_baseline(room));

        let mut envelope = Envelope::new(EventType::StateSnapshot, self.sequences.current_global(), data);
        if let RoomKey::Playlist(id) = room {
            envelope = envelope.with_scope(id.clone(), self.sequences.current_scope(id));
        }

        let wire = envelope.to_wire()?;
        self.transport
            .emit(
                EventType::StateSnapshot.as_str(),
                &wire,
                &EmitTarget::Client(client_id.to_string()),
            )
            .await?;

        log::debug!(
            "Snapshot {} (seq {}) sent to client {} for room {}",
            envelope.event_id,
            envelope.server_seq,
            client_id,
            room
        );
        Ok(envelope)
    }

    /// Remove `client_id` from `room`
    ///
    /// Stops future routing to that client for the room; already-enqueued
    /// broadcast entries are room-addressed and unaffected.
    pub async fn unsubscribe(&self, client_id: &str, room: &RoomKey) -> Result<()> {
        self.transport.leave_room(client_id, room).await
    }
}

/// Deterministic empty state per room kind
fn empty_baseline(room: &RoomKey) -> Value {
    match room {
        RoomKey::Global => json!({"playlists": []}),
        RoomKey::Playlist(_) => json!({"playlist": null, "tracks": []}),
        RoomKey::Client(_) => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::registry::ClientRegistry;

    #[tokio::test]
    async fn test_unknown_room_is_rejected() {
        let registry = Arc::new(ClientRegistry::new());
        let service = SnapshotService::new(
            Arc::new(SequenceGenerator::new()),
            Arc::new(crate::sync::transport::EmptyProvider),
            registry.clone(),
        );
        let _rx = registry.add_client("c1");

        let result = service
            .subscribe("c1", &RoomKey::Client("c1".to_string()))
            .await;
        assert!(matches!(result, Err(Error::UnknownRoom(_))));
    }

    #[tokio::test]
    async fn test_empty_provider_degrades_to_baseline() {
        let registry = Arc::new(ClientRegistry::new());
        let service = SnapshotService::new(
            Arc::new(SequenceGenerator::new()),
            Arc::new(crate::sync::transport::EmptyProvider),
            registry.clone(),
        );
        let mut rx = registry.add_client("c1");

        let envelope = service.subscribe("c1", &RoomKey::Global).await.unwrap();
        assert_eq!(envelope.data["playlists"], json!([]));

        let pushed = rx.try_recv().unwrap();
        assert_eq!(pushed.event, "state/snapshot");
        assert_eq!(pushed.envelope["data"]["playlists"], json!([]));
    }
}

// ABOUTME: Synchronization module for jukesync
// ABOUTME: Coordinator, sequence counters, routing, throttling, outbox, snapshots

mod config;
mod coordinator;
mod outbox;
mod registry;
mod router;
mod sequence;
mod snapshot;
mod throttle;
mod transport;

pub use config::SyncConfig;
pub use coordinator::SyncCoordinator;
pub use outbox::{DeliveryState, Outbox, OutboxEntry, OutboxStats};
pub use registry::{ClientId, ClientRegistry, PushMessage};
pub use router::{routes_for, RoomKey};
pub use sequence::SequenceGenerator;
pub use snapshot::SnapshotService;
pub use throttle::{GateDecision, ThrottleGate, ThrottleKey};
pub use transport::{DataProvider, EmitTarget, EmptyProvider, Transport};

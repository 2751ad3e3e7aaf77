// ABOUTME: Main library entry point for jukesync
// ABOUTME: Exports the state synchronization coordinator and its collaborator traits

//! # jukesync
//!
//! State synchronization engine for push-based jukebox clients.
//!
//! The crate turns "something changed" calls from unrelated producers (player
//! control, playlist edits, NFC tag association, upload progress) into
//! ordered, deduplicated, at-least-once-delivered notifications to the correct
//! subset of connected observers. It also services point-to-point command
//! acknowledgments and snapshot reconciliation for late subscribers.
//!
//! Delivery is at-least-once with idempotent, monotonically-ordered payloads;
//! duplicates are harmless to a well-behaved client. Sequence counters live in
//! memory only; a client reconnecting after a restart is reconciled via a
//! snapshot, not via replay.
//!
//! ## Example
//!
//! ```no_run
//! use jukesync::sync::{ClientRegistry, EmptyProvider, SyncConfig, SyncCoordinator};
//! use jukesync::protocol::EventType;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(ClientRegistry::new());
//!     let coordinator = SyncCoordinator::new(
//!         SyncConfig::default(),
//!         registry.clone(),
//!         Arc::new(EmptyProvider),
//!     );
//!     coordinator.start();
//!
//!     coordinator
//!         .broadcast_state_change(EventType::PlayerState, json!({"playing": true}), None, false)
//!         .await;
//! }
//! ```

#![warn(missing_docs)]

/// Wire-level event types and envelope schema
pub mod protocol;
/// State synchronization engine: coordinator, outbox, routing, snapshots
pub mod sync;

pub use protocol::{Envelope, EventType};
pub use sync::{ClientRegistry, SyncConfig, SyncCoordinator};

/// Result type for jukesync operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for jukesync
pub mod error {
    use thiserror::Error;

    /// Error types for synchronization operations
    #[derive(Error, Debug)]
    pub enum Error {
        /// Transient transport push failure; the outbox retries these,
        /// only the acknowledgment path surfaces them to callers
        #[error("Transport error: {0}")]
        Transport(String),

        /// Payload could not be encoded; the offending envelope is dropped
        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),

        /// Subscribe request named a room no router mapping exists for
        #[error("Unknown room: {0}")]
        UnknownRoom(String),

        /// The outbox queue exceeded its high watermark
        #[error("Outbox saturated: {pending} entries pending")]
        OutboxSaturated {
            /// Number of entries pending at the time of saturation
            pending: usize,
        },
    }
}

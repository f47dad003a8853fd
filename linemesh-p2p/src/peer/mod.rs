//! Peer connection management.
//!
//! This module provides:
//! - Peer identification and metadata
//! - The per-connection handshake and heartbeat state machine
//! - The application-layer extension seam
//! - Per-peer read/write loop

pub mod connection;
pub mod extension;
pub mod info;
pub mod session;

// Re-export main types
pub use connection::{spawn_peer_connection, PeerCommand, PeerEvent};
pub use extension::{ApplicationProtocol, NoApplication, PeerSession};
pub use info::{ConnectionDirection, PeerId, PeerInfo};
pub use session::{Session, SessionEvent};

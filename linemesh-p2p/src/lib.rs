//! Peer-to-peer overlay networking for linemesh.
//!
//! This crate provides the protocol engine of a linemesh node:
//!
//! - A line-oriented, pipe-delimited command protocol with per-command
//!   validation
//! - A per-connection session driving the version/verack handshake,
//!   nonce checks, heartbeat pings and an inactivity timeout
//! - A capacity-bounded peer registry with duplicate detection
//! - Address-book gossip via `addr` / `getaddr`
//!
//! # Architecture
//!
//! Each connection runs in its own tokio task. The peer registry and the
//! address book are owned by a single coordinating task; sessions talk to it
//! over channels, so no locking is needed.
//!
//! ```text
//! Main Task (P2pNode::run())
//! ├── Listener (accept incoming)
//! ├── Dialer (bootstrap peers)
//! ├── Session Task 1 (read/write loop, timers)
//! └── Session Task 2 (read/write loop, timers)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use linemesh_p2p::{P2pConfig, P2pNode};
//!
//! let config = P2pConfig::new("0.0.0.0:3000".parse().unwrap());
//! let node = P2pNode::new(config);
//! node.run().await?;
//! ```

pub mod config;
pub mod error;

pub mod protocol;
pub mod peer;
pub mod manager;
pub mod node;

// Re-export main types
pub use config::{LocalIdentity, P2pConfig, MAX_LINE_LENGTH, PROTOCOL_VERSION};
pub use error::{P2pError, P2pResult};
pub use manager::{AddressBook, PeerManager};
pub use node::{P2pNode, P2pStateUpdate, PeerSnapshot};
pub use peer::{ConnectionDirection, PeerId, PeerSession, Session};
pub use protocol::{Command, HostAddr, Rejection};

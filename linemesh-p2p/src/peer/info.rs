//! Peer information and identification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::config::MAX_USER_ID_LENGTH;
use crate::protocol::HostAddr;

/// Unique identifier for a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create a new peer ID from a counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Direction of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionDirection {
    /// We initiated the connection.
    Outbound,
    /// Peer connected to us.
    Inbound,
}

impl ConnectionDirection {
    /// Single-letter tag used in session labels.
    pub fn tag(&self) -> char {
        match self {
            ConnectionDirection::Outbound => 'o',
            ConnectionDirection::Inbound => 'i',
        }
    }
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Outbound => write!(f, "outbound"),
            ConnectionDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Information about a connected peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Unique peer identifier for this session.
    pub id: PeerId,
    /// Socket address of the peer.
    pub addr: SocketAddr,
    /// Direction of the connection.
    pub direction: ConnectionDirection,
    /// Identifier the peer reported in its `version`.
    pub user_id: Option<String>,
    /// Address the peer claims to listen on.
    pub advertised: Option<HostAddr>,
    /// When the connection was established.
    pub connected_at: Instant,
}

impl PeerInfo {
    /// Create info for a new peer connection.
    pub fn new(id: PeerId, addr: SocketAddr, direction: ConnectionDirection) -> Self {
        Self {
            id,
            addr,
            direction,
            user_id: None,
            advertised: None,
            connected_at: Instant::now(),
        }
    }

    /// Record what the peer told us in its `version`.
    pub fn learn_identity(&mut self, user_id: String, advertised: HostAddr) {
        self.user_id = Some(user_id);
        self.advertised = Some(advertised);
    }

    /// Check if this is an outbound connection.
    pub fn is_outbound(&self) -> bool {
        self.direction == ConnectionDirection::Outbound
    }

    /// Fixed-width label: `(i) [id] name`, where name is the reported user
    /// id or the socket address.
    pub fn label(&self) -> String {
        let name = match &self.user_id {
            Some(user_id) => user_id.clone(),
            None => self.addr.to_string(),
        };
        format!(
            "({}) [{}] {:<width$.width$}",
            self.direction.tag(),
            self.id.0,
            name,
            width = MAX_USER_ID_LENGTH
        )
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.id, self.addr, self.direction)
    }
}

//! Capacity-bounded registry of admitted sessions.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::error::{P2pError, P2pResult};
use crate::peer::{PeerCommand, PeerId, PeerInfo};
use crate::protocol::HostAddr;

/// An admitted session as seen by the coordinator.
#[derive(Debug)]
pub struct PeerEntry {
    /// What we know about the peer.
    pub info: PeerInfo,
    /// Command channel into the session task (unbounded to avoid deadlock).
    pub command_tx: mpsc::UnboundedSender<PeerCommand>,
    /// Whether the session reported a finished handshake.
    pub handshake_complete: bool,
}

/// Admitted sessions, never more than `capacity`.
#[derive(Debug)]
pub struct PeerRegistry {
    capacity: usize,
    peers: BTreeMap<PeerId, PeerEntry>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            peers: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Check whether another session would exceed capacity.
    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.capacity
    }

    /// Admit a session.
    pub fn insert(
        &mut self,
        info: PeerInfo,
        command_tx: mpsc::UnboundedSender<PeerCommand>,
    ) -> P2pResult<()> {
        if self.is_full() {
            return Err(P2pError::MaxConnectionsReached { max: self.capacity });
        }
        self.peers.insert(
            info.id,
            PeerEntry {
                info,
                command_tx,
                handshake_complete: false,
            },
        );
        Ok(())
    }

    /// Remove a session. Removing an unknown id is a no-op.
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerEntry> {
        self.peers.remove(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerEntry> {
        self.peers.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerEntry> {
        self.peers.get_mut(peer_id)
    }

    /// Find another session that already advertised `addr`.
    pub fn find_advertised(&self, addr: &HostAddr, except: &PeerId) -> Option<PeerId> {
        self.peers
            .values()
            .find(|entry| entry.info.id != *except && entry.info.advertised.as_ref() == Some(addr))
            .map(|entry| entry.info.id)
    }

    /// Iterate over admitted sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values()
    }

    /// Session labels, one per line.
    pub fn listing(&self) -> String {
        self.peers
            .values()
            .map(|entry| entry.info.label())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

//! Gossiped peer addresses.
//!
//! Maps an advertised `host:port` to the most recent activity time anyone
//! reported for it. Merging keeps the maximum, so the result does not depend
//! on arrival order. Entries are never removed.

use std::collections::BTreeMap;

use crate::protocol::{Command, HostAddr, PeerAddress};

/// Known peer addresses and their last-seen-active time (unix seconds).
#[derive(Debug, Default, Clone)]
pub struct AddressBook {
    entries: BTreeMap<HostAddr, u64>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `addr` as active at `last_seen` unless a newer time is stored.
    ///
    /// Returns whether the entry changed.
    pub fn update(&mut self, addr: HostAddr, last_seen: u64) -> bool {
        match self.entries.get(&addr) {
            Some(stored) if *stored >= last_seen => false,
            _ => {
                self.entries.insert(addr, last_seen);
                true
            }
        }
    }

    /// Merge a received `addr` list. Returns the number of changed entries.
    pub fn merge(&mut self, peers: &[PeerAddress]) -> usize {
        peers
            .iter()
            .filter(|peer| self.update(peer.addr, peer.last_seen))
            .count()
    }

    /// Every entry, ordered by address.
    pub fn snapshot(&self) -> Vec<PeerAddress> {
        self.entries
            .iter()
            .map(|(addr, last_seen)| PeerAddress {
                addr: *addr,
                last_seen: *last_seen,
            })
            .collect()
    }

    /// The `addr` reply to a `getaddr`.
    pub fn to_command(&self) -> Command {
        Command::Addr(self.snapshot())
    }

    pub fn get(&self, addr: &HostAddr) -> Option<u64> {
        self.entries.get(addr).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

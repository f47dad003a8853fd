//! Peer manager.
//!
//! Admits adopted sockets into a capacity-bounded registry, spawns their
//! session tasks, and runs address gossip. Owned by the single coordinating
//! task; sessions reach it only through [`PeerEvent`]s.

pub mod address_book;
pub mod registry;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Encoder;

use crate::config::{LocalIdentity, P2pConfig};
use crate::error::{P2pError, P2pResult};
use crate::peer::{
    spawn_peer_connection, ApplicationProtocol, ConnectionDirection, NoApplication, PeerCommand,
    PeerEvent, PeerId, PeerSession, Session,
};
use crate::protocol::validate::{CODE_BAD_REQUEST, CODE_UNAVAILABLE};
use crate::protocol::{unix_now, Command, HostAddr, LineCodec, VersionMessage};

pub use address_book::AddressBook;
pub use registry::{PeerEntry, PeerRegistry};

/// How long shutdown waits for each session task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Manages all peer connections.
pub struct PeerManager {
    /// Admitted sessions.
    registry: PeerRegistry,
    /// Gossiped addresses.
    address_book: AddressBook,
    /// Session task handles, for shutdown.
    tasks: HashMap<PeerId, JoinHandle<()>>,
    /// P2P configuration.
    config: Arc<P2pConfig>,
    /// Identity shared by every session.
    identity: Arc<LocalIdentity>,
    /// Address we advertise in `version`.
    advertise: SocketAddr,
    /// Next peer ID counter.
    next_peer_id: u64,
}

impl PeerManager {
    /// Create a new peer manager advertising `advertise` to peers.
    pub fn new(config: Arc<P2pConfig>, advertise: SocketAddr) -> Self {
        Self {
            registry: PeerRegistry::new(config.max_peers),
            address_book: AddressBook::new(),
            tasks: HashMap::new(),
            identity: Arc::new(config.identity.clone()),
            config,
            advertise,
            next_peer_id: 1,
        }
    }

    /// Allocate a new peer ID.
    pub fn next_peer_id(&mut self) -> PeerId {
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        PeerId::new(id)
    }

    /// Adopt a connected socket with no application layer.
    pub fn new_connection(
        &mut self,
        stream: TcpStream,
        direction: ConnectionDirection,
        event_tx: &mpsc::Sender<PeerEvent>,
    ) -> P2pResult<PeerId> {
        self.new_connection_with(stream, direction, event_tx, NoApplication)
    }

    /// Adopt a connected socket, layering `app` over its session.
    ///
    /// At capacity the socket gets a 500 `reject` and is closed without
    /// ever being registered.
    pub fn new_connection_with<A: ApplicationProtocol>(
        &mut self,
        stream: TcpStream,
        direction: ConnectionDirection,
        event_tx: &mpsc::Sender<PeerEvent>,
        app: A,
    ) -> P2pResult<PeerId> {
        let peer_id = self.next_peer_id();
        let remote = stream.peer_addr()?;
        let local = stream.local_addr()?;

        if self.registry.is_full() {
            tracing::warn!(
                peer = %peer_id,
                addr = %remote,
                max = self.registry.capacity(),
                "Rejecting connection: no slots"
            );
            tokio::spawn(reject_and_close(stream, peer_id));
            return Err(P2pError::MaxConnectionsReached {
                max: self.registry.capacity(),
            });
        }

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %remote, error = %e, "Failed to set TCP_NODELAY");
        }

        let session = Session::new(
            peer_id,
            direction,
            local,
            remote,
            self.identity.clone(),
            self.advertise,
        );
        let info = session.info().clone();
        let (command_tx, handle) = spawn_peer_connection(
            PeerSession::new(session, app),
            stream,
            event_tx.clone(),
            self.config.clone(),
        );

        self.registry.insert(info, command_tx)?;
        self.tasks.insert(peer_id, handle);
        tracing::info!(peer = %peer_id, addr = %remote, direction = %direction, "Peer admitted");
        self.log_registry();

        Ok(peer_id)
    }

    /// Apply one event from a session task.
    pub fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::HandshakeComplete {
                peer_id,
                label,
                advertised,
            } => {
                tracing::info!(peer = %peer_id, label = %label, "Handshake complete");
                if let Some(entry) = self.registry.get_mut(&peer_id) {
                    entry.handshake_complete = true;
                }
                if let Some(addr) = advertised {
                    self.address_book.update(addr, unix_now());
                }
                if self.config.request_addrs_on_connect {
                    self.send_or_log(&peer_id, Command::GetAddr);
                }
            }
            PeerEvent::Message { peer_id, command } => self.handle_command(peer_id, *command),
            PeerEvent::Disconnected { peer_id, reason } => {
                self.tasks.remove(&peer_id);
                if self.registry.remove(&peer_id).is_some() {
                    tracing::info!(peer = %peer_id, reason = %reason, "Peer disconnected");
                    self.log_registry();
                }
            }
        }
    }

    fn handle_command(&mut self, peer_id: PeerId, command: Command) {
        match command {
            Command::Version(version) => self.handle_version(peer_id, version),
            Command::Addr(peers) => {
                let changed = self.address_book.merge(&peers);
                tracing::debug!(
                    peer = %peer_id,
                    received = peers.len(),
                    changed,
                    known = self.address_book.len(),
                    "Merged addresses"
                );
            }
            Command::GetAddr => {
                let reply = self.address_book.to_command();
                self.send_or_log(&peer_id, reply);
            }
            Command::Message(notice) => {
                tracing::info!(
                    peer = %peer_id,
                    code = notice.code,
                    reason = %notice.reason,
                    detail = %notice.detail,
                    "Peer message"
                );
            }
            Command::Reject(notice) => {
                tracing::warn!(
                    peer = %peer_id,
                    code = notice.code,
                    reason = %notice.reason,
                    detail = %notice.detail,
                    "Peer rejected us"
                );
            }
            other => {
                tracing::trace!(peer = %peer_id, command = other.name(), "Ignoring command");
            }
        }
    }

    /// Refuse a second session to an already connected node, or to ourselves.
    ///
    /// Only the newer session is evaluated and closed.
    fn handle_version(&mut self, peer_id: PeerId, version: VersionMessage) {
        let ours = HostAddr::from(self.advertise);
        let existing = self.registry.find_advertised(&version.sender, &peer_id);

        if existing.is_some() || version.sender == ours {
            tracing::info!(
                peer = %peer_id,
                advertised = %version.sender,
                existing = ?existing,
                "Rejecting duplicate connection"
            );
            self.send_or_log(
                &peer_id,
                Command::reject(
                    i64::from(CODE_BAD_REQUEST),
                    "Duplicate connection",
                    "Connection already established",
                ),
            );
            if let Err(e) = self.disconnect_peer(&peer_id) {
                tracing::debug!(peer = %peer_id, error = %e, "Disconnect failed");
            }
            return;
        }

        if let Some(entry) = self.registry.get_mut(&peer_id) {
            entry.info.learn_identity(version.user_id, version.sender);
        }
    }

    /// Send a command to a specific peer.
    /// Uses unbounded channel so this never blocks.
    pub fn send_to_peer(&self, peer_id: &PeerId, command: Command) -> P2pResult<()> {
        let entry = self
            .registry
            .get(peer_id)
            .ok_or_else(|| P2pError::PeerNotFound(peer_id.to_string()))?;

        entry
            .command_tx
            .send(PeerCommand::Send(command))
            .map_err(|_| P2pError::ChannelSend("Peer command channel closed".to_string()))
    }

    fn send_or_log(&self, peer_id: &PeerId, command: Command) {
        if let Err(e) = self.send_to_peer(peer_id, command) {
            tracing::debug!(peer = %peer_id, error = %e, "Failed to send to peer");
        }
    }

    /// Disconnect a peer.
    /// A second request for the same peer is harmless.
    pub fn disconnect_peer(&self, peer_id: &PeerId) -> P2pResult<()> {
        let entry = self
            .registry
            .get(peer_id)
            .ok_or_else(|| P2pError::PeerNotFound(peer_id.to_string()))?;

        entry
            .command_tx
            .send(PeerCommand::Disconnect)
            .map_err(|_| P2pError::ChannelSend("Peer command channel closed".to_string()))
    }

    /// Ask every session to close and wait briefly for the tasks to finish.
    pub async fn shutdown(&mut self) {
        tracing::info!(count = self.tasks.len(), "Shutting down peer connections");

        for entry in self.registry.iter() {
            let _ = entry.command_tx.send(PeerCommand::Disconnect);
        }

        for (peer_id, handle) in self.tasks.drain() {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Err(e)) => tracing::warn!(peer = %peer_id, error = %e, "Peer task failed"),
                Err(_) => tracing::debug!(peer = %peer_id, "Peer task did not stop in time"),
                Ok(Ok(())) => {}
            }
        }
    }

    fn log_registry(&self) {
        tracing::info!(
            peers = self.registry.len(),
            max = self.registry.capacity(),
            "Connected peers:\n{}",
            self.registry.listing()
        );
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    /// Number of admitted sessions.
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Get the configuration.
    pub fn config(&self) -> &P2pConfig {
        &self.config
    }
}

/// Tell an over-capacity peer why it is dropped, then close.
async fn reject_and_close(mut stream: TcpStream, peer_id: PeerId) {
    let reject = Command::reject(
        i64::from(CODE_UNAVAILABLE),
        "Connections full",
        "Cannot accept any more connections",
    );
    let mut buf = BytesMut::new();
    if LineCodec::new().encode(reject, &mut buf).is_err() {
        return;
    }
    if let Err(e) = stream.write_all(&buf).await {
        tracing::debug!(peer = %peer_id, error = %e, "Failed to send capacity reject");
    }
    let _ = stream.shutdown().await;
}

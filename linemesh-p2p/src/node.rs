//! Main P2P node orchestrator.
//!
//! Owns the listener and the bootstrap dialer and runs the single
//! coordinating task that holds the [`PeerManager`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::config::P2pConfig;
use crate::error::{P2pError, P2pResult};
use crate::manager::PeerManager;
use crate::peer::{ConnectionDirection, PeerEvent, PeerId};
use crate::protocol::PeerAddress;

/// State update sent from P2P node to external observers.
#[derive(Debug, Clone)]
pub struct P2pStateUpdate {
    /// Admitted sessions.
    pub peers: Vec<PeerSnapshot>,
    /// Address book contents.
    pub known_addresses: Vec<PeerAddress>,
}

/// Snapshot of peer information for external reporting.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub direction: ConnectionDirection,
    pub user_id: Option<String>,
    pub handshake_complete: bool,
}

/// Main P2P node.
pub struct P2pNode {
    /// P2P configuration.
    config: Arc<P2pConfig>,
    /// Shutdown signal receiver.
    shutdown_rx: Option<mpsc::Receiver<()>>,
    /// Shutdown signal sender (for cloning).
    shutdown_tx: mpsc::Sender<()>,
    /// Channel to send the bound address when the node starts.
    bound_addr_tx: Option<oneshot::Sender<SocketAddr>>,
    /// Channel to send state updates to external observers.
    state_tx: Option<mpsc::Sender<P2pStateUpdate>>,
}

impl P2pNode {
    /// Create a new P2P node.
    pub fn new(config: P2pConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            config: Arc::new(config),
            shutdown_rx: Some(shutdown_rx),
            shutdown_tx,
            bound_addr_tx: None,
            state_tx: None,
        }
    }

    /// Get a oneshot receiver that will receive the bound address when the node starts.
    /// This is useful for tests that need to know the actual port when using port 0.
    pub fn bound_addr_receiver(&mut self) -> oneshot::Receiver<SocketAddr> {
        let (tx, rx) = oneshot::channel();
        self.bound_addr_tx = Some(tx);
        rx
    }

    /// Get a receiver for P2P state updates.
    /// State updates are sent whenever the registry or address book may have changed.
    pub fn state_updates_receiver(&mut self) -> mpsc::Receiver<P2pStateUpdate> {
        let (tx, rx) = mpsc::channel(64);
        self.state_tx = Some(tx);
        rx
    }

    /// Get the shutdown sender for external shutdown signals.
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the P2P node.
    pub async fn run(mut self) -> P2pResult<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<PeerEvent>(256);
        let (dialed_tx, mut dialed_rx) = mpsc::channel::<TcpStream>(16);

        // Start listener
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let advertise = self.config.identity.advertised(local_addr);
        tracing::info!(addr = %local_addr, advertise = %advertise, "P2P node listening");

        if let Some(tx) = self.bound_addr_tx.take() {
            let _ = tx.send(local_addr);
        }

        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| P2pError::Internal("node already started".to_string()))?;

        let mut peers = PeerManager::new(self.config.clone(), advertise);

        for addr in self.config.bootstrap_peers.clone() {
            tokio::spawn(dial(addr, self.config.clone(), dialed_tx.clone()));
        }

        loop {
            tokio::select! {
                // Handle shutdown
                _ = shutdown_rx.recv() => {
                    tracing::info!("P2P node shutting down");
                    peers.shutdown().await;
                    break;
                }

                // Accept inbound connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!(addr = %addr, "Accepted inbound");
                            let admitted = peers.new_connection(
                                stream,
                                ConnectionDirection::Inbound,
                                &event_tx,
                            );
                            if let Err(e) = admitted {
                                tracing::debug!(addr = %addr, error = %e, "Inbound not admitted");
                            }
                            self.send_state_update(&peers);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept error");
                        }
                    }
                }

                // Adopt finished outbound dials
                Some(stream) = dialed_rx.recv() => {
                    let admitted =
                        peers.new_connection(stream, ConnectionDirection::Outbound, &event_tx);
                    if let Err(e) = admitted {
                        tracing::debug!(error = %e, "Outbound not admitted");
                    }
                    self.send_state_update(&peers);
                }

                // Handle peer events
                Some(event) = event_rx.recv() => {
                    peers.handle_event(event);
                    self.send_state_update(&peers);
                }
            }
        }

        Ok(())
    }

    /// Send state update to external observers.
    fn send_state_update(&self, peers: &PeerManager) {
        if let Some(ref tx) = self.state_tx {
            let update = P2pStateUpdate {
                peers: peers
                    .registry()
                    .iter()
                    .map(|entry| PeerSnapshot {
                        id: entry.info.id,
                        addr: entry.info.addr,
                        direction: entry.info.direction,
                        user_id: entry.info.user_id.clone(),
                        handshake_complete: entry.handshake_complete,
                    })
                    .collect(),
                known_addresses: peers.address_book().snapshot(),
            };

            // Send non-blocking - if the receiver is full or dropped, we just skip
            let _ = tx.try_send(update);
        }
    }
}

/// Dial a bootstrap peer and hand the socket to the coordinator.
async fn dial(addr: SocketAddr, config: Arc<P2pConfig>, dialed_tx: mpsc::Sender<TcpStream>) {
    tracing::debug!(addr = %addr, "Connecting to peer");

    let stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!(addr = %addr, error = %e, "Outbound connection failed");
            return;
        }
        Err(_) => {
            let e = P2pError::ConnectionTimeout { addr };
            tracing::warn!(addr = %addr, error = %e, "Outbound connection failed");
            return;
        }
    };

    tracing::debug!(addr = %addr, "TCP connection established, starting handshake");
    if dialed_tx.send(stream).await.is_err() {
        tracing::debug!(addr = %addr, "Node stopped before dial completed");
    }
}

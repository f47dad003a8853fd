//! Acceptance tests for the P2P layer.
//!
//! These tests verify the acceptance criteria over real loopback sockets:
//! 1. Handshake - Two nodes connect and both complete the handshake
//! 2. Wire handshake - A raw client walks through version/verack by hand
//! 3. Heartbeat - A connected node sends pings at the configured interval
//! 4. Validation - Malformed lines are rejected without closing the session
//! 5. Gossip - `addr` entries are merged and returned on `getaddr`
//! 6. Admission - The sixth connection to a five-slot node is refused
//! 7. Idle timeout - Silent connections are closed

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout};

use linemesh_p2p::{P2pConfig, P2pNode, P2pStateUpdate};

/// Address the raw test client claims to listen on.
const CLIENT_ADVERTISE: &str = "127.0.0.1:4999";

/// Create a test node configuration with port 0 (OS assigns port).
fn test_config(user_id: &str) -> P2pConfig {
    P2pConfig::new("127.0.0.1:0".parse().unwrap())
        .with_user_id(user_id)
        .with_connect_timeout(Duration::from_secs(5))
        .with_ping_interval(Duration::from_millis(200))
}

/// Wait for a condition with timeout, polling periodically.
async fn wait_for<F, Fut>(timeout_ms: u64, poll_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout_duration = Duration::from_millis(timeout_ms);
    let poll_duration = Duration::from_millis(poll_ms);

    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() > timeout_duration {
            return false;
        }
        sleep(poll_duration).await;
    }
}

type LatestState = Arc<Mutex<Option<P2pStateUpdate>>>;

/// Keep only the most recent state update.
fn track_state(mut rx: mpsc::Receiver<P2pStateUpdate>) -> LatestState {
    let latest: LatestState = Arc::new(Mutex::new(None));
    let sink = latest.clone();
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            *sink.lock().await = Some(update);
        }
    });
    latest
}

struct RunningNode {
    addr: SocketAddr,
    state: LatestState,
    shutdown: mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl RunningNode {
    async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = timeout(Duration::from_secs(3), self.handle).await;
    }

    async fn peer_count(&self) -> usize {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|s| s.peers.len())
            .unwrap_or(0)
    }

    async fn handshakes(&self) -> usize {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|s| s.peers.iter().filter(|p| p.handshake_complete).count())
            .unwrap_or(0)
    }
}

/// Start a node and return its bound address via the oneshot channel.
async fn start_node(mut node: P2pNode) -> RunningNode {
    let addr_rx = node.bound_addr_receiver();
    let state = track_state(node.state_updates_receiver());
    let shutdown = node.shutdown_handle();

    let handle = tokio::spawn(async move {
        let _ = node.run().await;
    });

    // Wait for the bound address
    let addr = addr_rx.await.expect("Failed to get bound address");
    RunningNode {
        addr,
        state,
        shutdown,
        handle,
    }
}

/// A hand-driven peer speaking the line protocol.
struct RawPeer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local: SocketAddr,
}

impl RawPeer {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let local = stream.local_addr().unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            local,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .expect("write");
    }

    /// Next line without its terminator, or `None` on EOF or timeout.
    async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        match timeout(Duration::from_secs(3), self.reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => {
                assert!(line.ends_with("\r\n"), "line not CRLF-terminated: {:?}", line);
                Some(line.trim_end().to_string())
            }
            _ => None,
        }
    }

    /// Read until a line starting with `prefix` arrives.
    async fn recv_until(&mut self, prefix: &str) -> String {
        for _ in 0..32 {
            match self.recv().await {
                Some(line) if line.starts_with(prefix) => return line,
                Some(_) => continue,
                None => break,
            }
        }
        panic!("never received a line starting with {:?}", prefix);
    }

    /// Act as the dialing side of the handshake.
    async fn handshake(&mut self, node: SocketAddr) {
        self.send(&format!(
            "version|3|1|1700000000|{}|{}|4242|raw-client|0",
            node, CLIENT_ADVERTISE
        ))
        .await;

        assert_eq!(self.recv().await.as_deref(), Some("verack|4242"));

        let version = self.recv().await.expect("version from node");
        let fields: Vec<&str> = version.split('|').collect();
        assert_eq!(fields.len(), 9, "unexpected version line {:?}", version);
        assert_eq!(fields[0], "version");
        assert_eq!(fields[4], self.local.to_string());
        assert_eq!(fields[5], node.to_string());
        assert_eq!(fields[7], "alpha");

        self.send(&format!("verack|{}", fields[6])).await;
        assert_eq!(
            self.recv().await.as_deref(),
            Some("message|100|Connection established|Handshake complete")
        );
    }
}

// ============================================================================
// Test 1: Handshake - Two nodes connect and both complete the handshake
// ============================================================================

#[tokio::test]
async fn test_two_nodes_complete_handshake() {
    let node_a = start_node(P2pNode::new(test_config("alpha"))).await;
    let config_b = test_config("beta").with_bootstrap_peers(vec![node_a.addr]);
    let node_b = start_node(P2pNode::new(config_b)).await;

    let connected = wait_for(5000, 50, || async {
        node_a.handshakes().await == 1 && node_b.handshakes().await == 1
    })
    .await;
    assert!(connected, "Both sides should complete the handshake");

    // Each side learned the other's self-reported id.
    let state_a = node_a.state.lock().await.clone().unwrap();
    let state_b = node_b.state.lock().await.clone().unwrap();
    assert_eq!(state_a.peers[0].user_id.as_deref(), Some("beta"));
    assert_eq!(state_b.peers[0].user_id.as_deref(), Some("alpha"));

    // Gossip after the handshake: B learns A's advertised address.
    let addr_a = node_a.addr;
    let learned = wait_for(3000, 50, || async {
        node_b
            .state
            .lock()
            .await
            .as_ref()
            .map(|s| s.known_addresses.iter().any(|p| p.addr.socket_addr() == addr_a))
            .unwrap_or(false)
    })
    .await;
    assert!(learned, "B should know A's address");

    node_b.stop().await;
    node_a.stop().await;
}

// ============================================================================
// Test 2/3: Wire handshake and heartbeat
// ============================================================================

#[tokio::test]
async fn test_raw_handshake_and_heartbeat() {
    let node = start_node(P2pNode::new(test_config("alpha"))).await;
    let mut peer = RawPeer::connect(node.addr).await;

    peer.handshake(node.addr).await;

    // The node asks for addresses, then pings on its interval.
    peer.recv_until("getaddr").await;
    let ping = peer.recv_until("ping|").await;
    let nonce = ping.trim_start_matches("ping|").to_string();
    peer.send(&format!("pong|{}", nonce)).await;

    // A stale pong is rejected once the next ping is out.
    let next = peer.recv_until("ping|").await;
    assert_ne!(next, ping);
    peer.send(&format!("pong|{}", nonce)).await;
    let reject = peer.recv_until("reject|").await;
    assert!(reject.starts_with("reject|400|Nonce does not match|Received: pong|"));

    // Answering our own ping.
    peer.send("ping|77").await;
    assert_eq!(peer.recv_until("pong|").await, "pong|77");

    assert_eq!(node.handshakes().await, 1);
    node.stop().await;
}

// ============================================================================
// Test 4: Validation - Malformed lines are rejected, session stays open
// ============================================================================

#[tokio::test]
async fn test_invalid_lines_are_rejected() {
    let node = start_node(P2pNode::new(test_config("alpha"))).await;
    let mut peer = RawPeer::connect(node.addr).await;

    peer.send("hello|world").await;
    assert_eq!(
        peer.recv().await.as_deref(),
        Some("reject|400|Unrecognized command|Received: hello|world")
    );

    peer.send("verack|1").await;
    assert_eq!(
        peer.recv().await.as_deref(),
        Some("reject|400|Nonce does not match|Received: verack|1")
    );

    // Wrong recipient port.
    peer.send(&format!(
        "version|3|1|1700000000|127.0.0.1:1|{}|1|raw|0",
        CLIENT_ADVERTISE
    ))
    .await;
    let reject = peer.recv().await.unwrap();
    assert!(reject.starts_with("reject|400|Recipient does not match|Received: version|"));

    // Still usable afterwards.
    peer.handshake(node.addr).await;
    node.stop().await;
}

// ============================================================================
// Test 5: Gossip - addr entries are merged and served
// ============================================================================

#[tokio::test]
async fn test_address_gossip() {
    let node = start_node(P2pNode::new(test_config("alpha"))).await;
    let mut peer = RawPeer::connect(node.addr).await;
    peer.handshake(node.addr).await;
    peer.recv_until("getaddr").await;

    peer.send("addr|2|100|10.0.0.1:7000|200|10.0.0.2:7000").await;
    peer.send("addr|1|50|10.0.0.1:7000").await;
    peer.send("addr|1|1|10.0.0.2:7000|5").await;
    let reject = peer.recv_until("reject|").await;
    assert!(reject.starts_with("reject|400|Number of peers does not match list length"));

    peer.send("getaddr").await;
    let addr = peer.recv_until("addr|").await;
    assert!(addr.contains("|100|10.0.0.1:7000"), "{}", addr);
    assert!(addr.contains("|200|10.0.0.2:7000"), "{}", addr);
    assert!(addr.contains(CLIENT_ADVERTISE), "{}", addr);
    assert!(addr.starts_with("addr|3|"), "{}", addr);

    node.stop().await;
}

// ============================================================================
// Test 6: Admission - capacity 5 refuses the sixth connection
// ============================================================================

#[tokio::test]
async fn test_sixth_connection_rejected() {
    let node = start_node(P2pNode::new(test_config("alpha").with_max_peers(5))).await;

    let mut admitted = Vec::new();
    for _ in 0..5 {
        admitted.push(RawPeer::connect(node.addr).await);
    }
    assert!(wait_for(3000, 20, || async { node.peer_count().await == 5 }).await);

    let mut sixth = RawPeer::connect(node.addr).await;
    assert_eq!(
        sixth.recv().await.as_deref(),
        Some("reject|500|Connections full|Cannot accept any more connections")
    );
    let mut rest = Vec::new();
    sixth.reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    assert_eq!(node.peer_count().await, 5);

    // Freeing a slot lets a new connection in.
    drop(admitted.remove(0));
    assert!(wait_for(3000, 20, || async { node.peer_count().await == 4 }).await);

    let mut seventh = RawPeer::connect(node.addr).await;
    assert!(wait_for(3000, 20, || async { node.peer_count().await == 5 }).await);
    seventh.handshake(node.addr).await;

    node.stop().await;
}

// ============================================================================
// Test 7: Idle timeout - silent connections are closed
// ============================================================================

#[tokio::test]
async fn test_idle_connection_closed() {
    let config = test_config("alpha").with_idle_timeout(Duration::from_millis(300));
    let node = start_node(P2pNode::new(config)).await;

    let mut peer = RawPeer::connect(node.addr).await;

    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(3), peer.reader.read_to_end(&mut buf)).await;
    assert!(read.is_ok(), "node should close the idle connection");
    assert!(buf.is_empty());
    assert!(wait_for(3000, 20, || async { node.peer_count().await == 0 }).await);

    node.stop().await;
}

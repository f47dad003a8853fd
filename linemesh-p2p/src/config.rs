//! P2P configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Protocol version this node announces.
pub const PROTOCOL_VERSION: u32 = 3;

/// Protocol versions accepted from peers.
pub const SUPPORTED_VERSIONS: [u32; 2] = [3, 4];

/// Default service bitmask.
pub const DEFAULT_SERVICES: u8 = 1;

/// Largest accepted service bitmask.
pub const MAX_SERVICES: i64 = 7;

/// Maximum length of a single protocol line in bytes (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Width of the self-reported id in session labels.
pub const MAX_USER_ID_LENGTH: usize = 28;

/// Default number of admitted peers.
pub const DEFAULT_MAX_PEERS: usize = 5;

/// Default inactivity window before a session is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default heartbeat interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default timeout for outbound dials.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default self-reported id.
pub const DEFAULT_USER_ID: &str = "linemesh";

/// What this node reports about itself in `version` messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Free-text identifier sent to peers.
    pub user_id: String,
    /// Protocol version to announce.
    pub protocol_version: u32,
    /// Service bitmask.
    pub services: u8,
    /// Current block height.
    pub block_height: u64,
    /// Reachable `host:port` to advertise. When `None`, the node derives it
    /// from its listening socket.
    pub advertise_addr: Option<SocketAddr>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID.to_string(),
            protocol_version: PROTOCOL_VERSION,
            services: DEFAULT_SERVICES,
            block_height: 0,
            advertise_addr: None,
        }
    }
}

impl LocalIdentity {
    /// Address announced as the sender of our `version` messages.
    ///
    /// Falls back to the bound address, with an unspecified IP replaced by
    /// loopback.
    pub fn advertised(&self, bound: SocketAddr) -> SocketAddr {
        match self.advertise_addr {
            Some(addr) => addr,
            None if bound.ip().is_unspecified() => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bound.port())
            }
            None => bound,
        }
    }
}

/// Configuration for the P2P node.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Address to bind the listener to.
    pub bind_addr: SocketAddr,

    /// Identity reported in `version` messages.
    pub identity: LocalIdentity,

    /// Maximum number of admitted sessions.
    pub max_peers: usize,

    /// Close a session after this long without inbound bytes.
    pub idle_timeout: Duration,

    /// Interval between heartbeat pings.
    pub ping_interval: Duration,

    /// Timeout for establishing outbound connections.
    pub connect_timeout: Duration,

    /// Peers to dial on startup.
    pub bootstrap_peers: Vec<SocketAddr>,

    /// Log every inbound and outbound line at info level.
    pub verbose: bool,

    /// Send `getaddr` once a handshake completes.
    pub request_addrs_on_connect: bool,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            identity: LocalIdentity::default(),
            max_peers: DEFAULT_MAX_PEERS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            bootstrap_peers: Vec::new(),
            verbose: false,
            request_addrs_on_connect: true,
        }
    }
}

impl P2pConfig {
    /// Create a new configuration with the specified bind address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Set the self-reported user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.identity.user_id = user_id.into();
        self
    }

    /// Set the address advertised to peers.
    pub fn with_advertise_addr(mut self, addr: SocketAddr) -> Self {
        self.identity.advertise_addr = Some(addr);
        self
    }

    /// Set the maximum number of admitted peers.
    pub fn with_max_peers(mut self, count: usize) -> Self {
        self.max_peers = count;
        self
    }

    /// Set the inactivity timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the outbound connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add bootstrap peers to connect to on startup.
    pub fn with_bootstrap_peers(mut self, peers: Vec<SocketAddr>) -> Self {
        self.bootstrap_peers = peers;
        self
    }

    /// Enable per-line logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Toggle the `getaddr` request sent after a handshake.
    pub fn with_request_addrs_on_connect(mut self, enabled: bool) -> Self {
        self.request_addrs_on_connect = enabled;
        self
    }
}

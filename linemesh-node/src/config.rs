//! Node configuration.

use std::net::SocketAddr;

use linemesh_p2p::config::{DEFAULT_MAX_PEERS, DEFAULT_USER_ID};
use linemesh_p2p::P2pConfig;

use crate::cli::Cli;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// P2P listen address.
    pub p2p_addr: SocketAddr,

    /// Peers to dial on startup.
    pub connect: Vec<SocketAddr>,

    /// Identifier reported to peers.
    pub user_id: String,

    /// Address advertised to peers, if not the listen address.
    pub advertise: Option<SocketAddr>,

    /// Maximum number of connected peers.
    pub max_peers: usize,

    /// Log every protocol line.
    pub verbose: bool,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            p2p_addr: cli.listen,
            connect: cli.connect.clone().unwrap_or_default(),
            user_id: cli.user_id.clone(),
            advertise: cli.advertise,
            max_peers: cli.max_peers,
            verbose: cli.verbose,
        }
    }

    /// Build P2P configuration from node config.
    pub fn p2p_config(&self) -> P2pConfig {
        let mut config = P2pConfig::new(self.p2p_addr)
            .with_user_id(self.user_id.clone())
            .with_max_peers(self.max_peers)
            .with_bootstrap_peers(self.connect.clone())
            .with_verbose(self.verbose);

        if let Some(addr) = self.advertise {
            config = config.with_advertise_addr(addr);
        }

        config
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            p2p_addr: P2pConfig::default().bind_addr,
            connect: Vec::new(),
            user_id: DEFAULT_USER_ID.to_string(),
            advertise: None,
            max_peers: DEFAULT_MAX_PEERS,
            verbose: false,
        }
    }
}

//! Command-line argument parsing.

use std::net::SocketAddr;

use clap::Parser;

/// Linemesh overlay node.
#[derive(Parser, Debug, Clone)]
#[command(name = "linemesh-node")]
#[command(about = "Linemesh overlay node binary")]
#[command(version)]
pub struct Cli {
    /// P2P listen address.
    #[arg(long, default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Comma-separated list of peers to dial on startup.
    #[arg(long, value_delimiter = ',')]
    pub connect: Option<Vec<SocketAddr>>,

    /// Identifier reported to peers.
    #[arg(long, default_value = linemesh_p2p::config::DEFAULT_USER_ID)]
    pub user_id: String,

    /// Reachable address to advertise (defaults to the listen address).
    #[arg(long)]
    pub advertise: Option<SocketAddr>,

    /// Maximum number of connected peers.
    #[arg(long, default_value_t = linemesh_p2p::config::DEFAULT_MAX_PEERS)]
    pub max_peers: usize,

    /// Log every protocol line.
    #[arg(long, short)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

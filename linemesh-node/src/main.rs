//! Linemesh overlay node binary.
//!
//! Parses the command line, sets up logging and runs a [`P2pNode`] until
//! SIGINT or SIGTERM.

mod cli;
mod config;
mod shutdown;

use std::time::Duration;

use linemesh_p2p::P2pNode;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::NodeConfig;
use crate::shutdown::wait_for_shutdown_signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("Linemesh Node v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = NodeConfig::from_cli(&cli);
    let node = P2pNode::new(config.p2p_config());
    let shutdown = node.shutdown_handle();

    let mut handle = tokio::spawn(node.run());

    tokio::select! {
        result = &mut handle => {
            // The node stopped on its own, most likely a bind failure.
            result??;
            return Ok(());
        }
        signal = wait_for_shutdown_signal() => signal?,
    }

    let _ = shutdown.send(()).await;
    match tokio::time::timeout(Duration::from_secs(5), handle).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!("P2P node did not stop in time"),
    }

    tracing::info!("Node shutdown complete");
    Ok(())
}

//! P2P error types.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::protocol::HostParseError;

/// P2P-specific errors.
#[derive(Debug, Error)]
pub enum P2pError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A line exceeded the maximum allowed length.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The command token is not in the schema.
    #[error("Attempted to parse invalid command: '{0}'")]
    UnknownCommand(String),

    /// A host literal could not be parsed.
    #[error("Invalid host: {0}")]
    InvalidHost(#[from] HostParseError),

    /// A field that passed validation could not be converted. Indicates a
    /// validator and the typed decoder disagree.
    #[error("Internal protocol fault: {0}")]
    Internal(String),

    /// Connection timed out.
    #[error("Connection timeout to {addr}")]
    ConnectionTimeout { addr: SocketAddr },

    /// Maximum connections reached.
    #[error("Maximum connections reached: {max}")]
    MaxConnectionsReached { max: usize },

    /// Channel send error.
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Peer not found.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Node is shutting down.
    #[error("Node shutting down")]
    Shutdown,
}

/// Result type for P2P operations.
pub type P2pResult<T> = Result<T, P2pError>;

//! P2P protocol layer.
//!
//! This module contains:
//! - The command schema, parser and typed command definitions
//! - Per-command validation rules
//! - Host literal parsing
//! - CRLF line framing codec
//! - Handshake flags and version message construction

pub mod command;
pub mod framing;
pub mod host;
pub mod validate;
pub mod version;

// Re-export main types
pub use command::{
    command_token, parse, Command, CommandKind, Notice, ParsedMessage, PeerAddress, SchemaEntry,
    Shape, VersionMessage, SCHEMA,
};
pub use framing::LineCodec;
pub use host::{HostAddr, HostParseError};
pub use validate::{is_valid, Rejection, ValidationContext};
pub use version::{create_version_message, fresh_nonce, unix_now, HandshakeFlag, HandshakeFlags};

//! Version handshake bookkeeping.
//!
//! The handshake protocol:
//! 1. The dialing side sends `version` as soon as the socket is up
//! 2. Upon receiving `version`, a side answers `verack` echoing the nonce
//! 3. A side that has not sent `version` yet sends it once it has replied
//! 4. The connection is established when both sides have sent and received
//!    both `version` and `verack`

use std::time::SystemTime;

use rand::Rng;

use crate::config::LocalIdentity;
use crate::protocol::command::{Command, VersionMessage};
use crate::protocol::host::HostAddr;

/// One step of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeFlag {
    VersionSent = 1,
    VersionReceived = 2,
    VerackSent = 4,
    VerackReceived = 8,
}

/// Handshake progress. Bits are only ever set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeFlags(u8);

impl HandshakeFlags {
    const ALL: u8 = HandshakeFlag::VersionSent as u8
        | HandshakeFlag::VersionReceived as u8
        | HandshakeFlag::VerackSent as u8
        | HandshakeFlag::VerackReceived as u8;

    /// No steps taken.
    pub fn new() -> Self {
        Self(0)
    }

    /// Record a step.
    pub fn set(&mut self, flag: HandshakeFlag) {
        self.0 |= flag as u8;
    }

    /// Whether a step has been taken.
    pub fn contains(&self, flag: HandshakeFlag) -> bool {
        self.0 & flag as u8 != 0
    }

    /// All four steps taken.
    pub fn is_complete(&self) -> bool {
        self.0 == Self::ALL
    }

    /// Raw bit pattern.
    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Draw a nonce for `version` or `ping`.
pub fn fresh_nonce() -> u64 {
    rand::thread_rng().gen()
}

/// Create a version message for handshake.
///
/// `recipient` is the remote end of the socket as we observe it, `sender` is
/// the address we listen on.
pub fn create_version_message(
    identity: &LocalIdentity,
    recipient: HostAddr,
    sender: HostAddr,
    nonce: u64,
) -> Command {
    Command::Version(VersionMessage {
        version: identity.protocol_version,
        services: identity.services,
        timestamp: unix_now(),
        recipient,
        sender,
        nonce,
        user_id: identity.user_id.clone(),
        block_height: identity.block_height,
    })
}

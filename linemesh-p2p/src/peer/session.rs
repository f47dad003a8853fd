//! Per-connection protocol state machine.
//!
//! [`Session`] owns no socket. It consumes framed lines, updates handshake
//! and heartbeat state, and queues outgoing commands in an outbox that the
//! connection task drains after every step. Keeping I/O out of here lets the
//! handshake be driven line by line in tests.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::LocalIdentity;
use crate::peer::info::{ConnectionDirection, PeerId, PeerInfo};
use crate::protocol::validate::CODE_INFO;
use crate::protocol::{
    command_token, create_version_message, fresh_nonce, is_valid, parse, Command, HandshakeFlag,
    HandshakeFlags, HostAddr, Rejection, ValidationContext,
};

/// Something the owner of a session must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// All four handshake steps are done. Emitted once per session.
    HandshakeComplete,
    /// A validated command for the layers above.
    Forward(Command),
    /// A line failed validation and a `reject` was queued.
    Rejected(Rejection),
}

/// Protocol state of one connection.
#[derive(Debug)]
pub struct Session {
    info: PeerInfo,
    local_addr: SocketAddr,
    identity: Arc<LocalIdentity>,
    /// Address we put in the sender field of our `version`.
    advertise: HostAddr,
    flags: HandshakeFlags,
    handshake_handled: bool,
    version_nonce: Option<u64>,
    ping_nonce: Option<u64>,
    last_active: u64,
    outbox: Vec<Command>,
}

impl Session {
    /// Create a session for an adopted socket.
    pub fn new(
        id: PeerId,
        direction: ConnectionDirection,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        identity: Arc<LocalIdentity>,
        advertise: SocketAddr,
    ) -> Self {
        Self {
            info: PeerInfo::new(id, remote_addr, direction),
            local_addr,
            identity,
            advertise: HostAddr::from(advertise),
            flags: HandshakeFlags::new(),
            handshake_handled: false,
            version_nonce: None,
            ping_nonce: None,
            last_active: 0,
            outbox: Vec::new(),
        }
    }

    /// Kick off the handshake. The dialing side speaks first.
    pub fn start(&mut self) {
        if self.info.direction == ConnectionDirection::Outbound {
            self.send_version();
        }
    }

    /// Process one framed line received at unix time `now`.
    pub fn handle_line(&mut self, line: &str, now: u64) -> Vec<SessionEvent> {
        self.last_active = now;
        let line = line.trim();
        let mut events = Vec::new();

        if let Err(rejection) = is_valid(command_token(line), line, &self.validation_context()) {
            tracing::debug!(
                peer = %self.info.id,
                reason = %rejection.reason,
                "Rejecting line"
            );
            self.send(rejection.clone().into_command());
            events.push(SessionEvent::Rejected(rejection));
            return events;
        }

        let command = match parse(line).and_then(|parsed| Command::from_parsed(&parsed)) {
            Ok(command) => command,
            Err(e) => {
                tracing::error!(peer = %self.info.id, error = %e, line, "Dropping validated line");
                return events;
            }
        };

        match command {
            Command::Version(version) => {
                self.info
                    .learn_identity(version.user_id.clone(), version.sender);
                self.flags.set(HandshakeFlag::VersionReceived);
                if !self.flags.contains(HandshakeFlag::VerackSent) {
                    self.send(Command::Verack(version.nonce));
                    self.flags.set(HandshakeFlag::VerackSent);
                }
                events.push(SessionEvent::Forward(Command::Version(version)));
                self.check_handshake(&mut events);
            }
            Command::Verack(_) => {
                self.flags.set(HandshakeFlag::VerackReceived);
                self.check_handshake(&mut events);
            }
            Command::Ping(nonce) => self.send(Command::Pong(nonce)),
            other => events.push(SessionEvent::Forward(other)),
        }

        events
    }

    fn check_handshake(&mut self, events: &mut Vec<SessionEvent>) {
        if self.flags.is_complete() && !self.handshake_handled {
            self.handshake_handled = true;
            tracing::debug!(peer = %self.info.id, label = %self.label(), "Handshake complete");
            self.send(Command::message(
                i64::from(CODE_INFO),
                "Connection established",
                "Handshake complete",
            ));
            events.push(SessionEvent::HandshakeComplete);
        } else if !self.flags.contains(HandshakeFlag::VersionSent) {
            self.send_version();
        }
    }

    fn send_version(&mut self) {
        let nonce = fresh_nonce();
        self.version_nonce = Some(nonce);
        let version = create_version_message(
            &self.identity,
            HostAddr::from(self.info.addr),
            self.advertise,
            nonce,
        );
        self.send(version);
        self.flags.set(HandshakeFlag::VersionSent);
    }

    /// Queue a heartbeat `ping` with a fresh nonce.
    ///
    /// Replaces any outstanding ping nonce; a `pong` for an older ping will
    /// be rejected.
    pub fn heartbeat(&mut self) {
        let nonce = fresh_nonce();
        self.ping_nonce = Some(nonce);
        self.send(Command::Ping(nonce));
    }

    /// Queue a command for sending.
    pub fn send(&mut self, command: Command) {
        self.outbox.push(command);
    }

    /// Drain queued commands in send order.
    pub fn take_outgoing(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outbox)
    }

    fn validation_context(&self) -> ValidationContext {
        ValidationContext {
            local_addr: self.local_addr,
            remote_addr: self.info.addr,
            version_nonce: self.version_nonce,
            ping_nonce: self.ping_nonce,
        }
    }

    pub fn id(&self) -> PeerId {
        self.info.id
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.info.direction
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn flags(&self) -> HandshakeFlags {
        self.flags
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.flags.is_complete()
    }

    /// Unix seconds of the last framed line, valid or not.
    pub fn last_active(&self) -> u64 {
        self.last_active
    }

    pub fn version_nonce(&self) -> Option<u64> {
        self.version_nonce
    }

    pub fn ping_nonce(&self) -> Option<u64> {
        self.ping_nonce
    }

    /// Fixed-width label for log lines.
    pub fn label(&self) -> String {
        self.info.label()
    }
}

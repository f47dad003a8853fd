//! Command schema, parser and typed commands.
//!
//! A protocol line is `command|field|field|...`. The schema fixes how many
//! fields follow each command token. For fixed-shape commands the last field
//! takes the rest of the line, delimiters included, so a `reject` can carry
//! the raw offending line as its detail. The variable-shape `addr` is split
//! on every delimiter.

use std::fmt;

use crate::error::{P2pError, P2pResult};
use crate::protocol::host::HostAddr;

/// Field delimiter.
pub const DELIMITER: char = '|';

/// How the arity of a schema entry is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Exactly `arity` fields; the last one takes the remainder of the line.
    Exact,
    /// At least `arity` fields; every delimiter splits.
    AtLeast,
}

/// One row of the command schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaEntry {
    /// Command this row describes.
    pub kind: CommandKind,
    /// Number of fields after the command token.
    pub arity: usize,
    /// Whether `arity` is exact or a minimum.
    pub shape: Shape,
}

/// All commands of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Version,
    Verack,
    Message,
    Reject,
    Ping,
    Pong,
    Addr,
    GetAddr,
}

const fn entry(kind: CommandKind, arity: usize, shape: Shape) -> SchemaEntry {
    SchemaEntry { kind, arity, shape }
}

/// The command schema.
pub const SCHEMA: [SchemaEntry; 8] = [
    entry(CommandKind::Version, 8, Shape::Exact),
    entry(CommandKind::Verack, 1, Shape::Exact),
    entry(CommandKind::Message, 3, Shape::Exact),
    entry(CommandKind::Reject, 3, Shape::Exact),
    entry(CommandKind::Ping, 1, Shape::Exact),
    entry(CommandKind::Pong, 1, Shape::Exact),
    entry(CommandKind::Addr, 2, Shape::AtLeast),
    entry(CommandKind::GetAddr, 0, Shape::Exact),
];

impl CommandKind {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Version => "version",
            CommandKind::Verack => "verack",
            CommandKind::Message => "message",
            CommandKind::Reject => "reject",
            CommandKind::Ping => "ping",
            CommandKind::Pong => "pong",
            CommandKind::Addr => "addr",
            CommandKind::GetAddr => "getaddr",
        }
    }

    /// Look up a command by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        SCHEMA
            .iter()
            .map(|entry| entry.kind)
            .find(|kind| kind.name() == name)
    }

    /// Schema row for this command.
    pub fn schema(&self) -> SchemaEntry {
        // Every variant has exactly one row.
        SCHEMA
            .iter()
            .copied()
            .find(|entry| entry.kind == *self)
            .unwrap_or(SchemaEntry {
                kind: *self,
                arity: 0,
                shape: Shape::Exact,
            })
    }

    /// Number of fields after the command token.
    pub fn arity(&self) -> usize {
        self.schema().arity
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A line split into its command and fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    /// The command token.
    pub command: CommandKind,
    /// Fields after the command token.
    pub fields: Vec<String>,
}

/// Everything before the first delimiter.
pub fn command_token(line: &str) -> &str {
    match line.find(DELIMITER) {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Split a line into command and fields according to the schema.
///
/// Fails only when the command token is unknown. Callers are expected to run
/// [`is_valid`](crate::protocol::is_valid) first, which rejects unknown
/// commands as a protocol error.
pub fn parse(line: &str) -> P2pResult<ParsedMessage> {
    let line = line.trim();
    let token = command_token(line);
    let command =
        CommandKind::from_name(token).ok_or_else(|| P2pError::UnknownCommand(token.to_string()))?;

    let body = match line.find(DELIMITER) {
        Some(idx) => &line[idx + 1..],
        None => "",
    };
    if body.is_empty() {
        return Ok(ParsedMessage {
            command,
            fields: Vec::new(),
        });
    }

    let entry = command.schema();
    let mut fields: Vec<String> = match entry.shape {
        Shape::Exact if entry.arity > 0 => body
            .splitn(entry.arity, DELIMITER)
            .map(str::to_string)
            .collect(),
        _ => body.split(DELIMITER).map(str::to_string).collect(),
    };

    // A trailing delimiter does not produce an empty final field.
    if fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }

    Ok(ParsedMessage { command, fields })
}

/// Version information exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    /// Protocol version number.
    pub version: u32,
    /// Service bitmask.
    pub services: u8,
    /// Sender's clock, unix seconds.
    pub timestamp: u64,
    /// Address the sender believes it is talking to.
    pub recipient: HostAddr,
    /// Address the sender listens on.
    pub sender: HostAddr,
    /// Handshake nonce, echoed in `verack`.
    pub nonce: u64,
    /// Self-reported identifier.
    pub user_id: String,
    /// Sender's block height.
    pub block_height: u64,
}

/// Payload of `message` and `reject`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Status-like code.
    pub code: i64,
    /// Short reason.
    pub reason: String,
    /// Free-form detail; may contain delimiters.
    pub detail: String,
}

/// A peer address with the time it was last seen active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddress {
    /// Advertised address.
    pub addr: HostAddr,
    /// Last time this peer was seen active (unix seconds).
    pub last_seen: u64,
}

/// All protocol commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Handshake
    /// Version information sent at start of connection.
    Version(VersionMessage),
    /// Acknowledgment echoing the version nonce.
    Verack(u64),

    // Notices
    /// Informational notice.
    Message(Notice),
    /// Rejection of a received line or of the connection.
    Reject(Notice),

    // Keepalive
    /// Ping with a nonce.
    Ping(u64),
    /// Pong echoing the nonce.
    Pong(u64),

    // Peer discovery
    /// Known peer addresses.
    Addr(Vec<PeerAddress>),
    /// Request for peer addresses.
    GetAddr,
}

impl Command {
    /// Schema kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Version(_) => CommandKind::Version,
            Command::Verack(_) => CommandKind::Verack,
            Command::Message(_) => CommandKind::Message,
            Command::Reject(_) => CommandKind::Reject,
            Command::Ping(_) => CommandKind::Ping,
            Command::Pong(_) => CommandKind::Pong,
            Command::Addr(_) => CommandKind::Addr,
            Command::GetAddr => CommandKind::GetAddr,
        }
    }

    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Build a `message` command.
    pub fn message(code: i64, reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Command::Message(Notice {
            code,
            reason: reason.into(),
            detail: detail.into(),
        })
    }

    /// Build a `reject` command.
    pub fn reject(code: i64, reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Command::Reject(Notice {
            code,
            reason: reason.into(),
            detail: detail.into(),
        })
    }

    /// Convert a parsed message into a typed command.
    ///
    /// The input must already have passed validation. An error here means the
    /// validator and this decoder disagree.
    pub fn from_parsed(parsed: &ParsedMessage) -> P2pResult<Self> {
        let fields = &parsed.fields;
        let command = match parsed.command {
            CommandKind::Version => Command::Version(VersionMessage {
                version: number(parsed, 0)?,
                services: number(parsed, 1)?,
                timestamp: number(parsed, 2)?,
                recipient: host(parsed, 3)?,
                sender: host(parsed, 4)?,
                nonce: number(parsed, 5)?,
                user_id: field(parsed, 6)?.to_string(),
                block_height: number(parsed, 7)?,
            }),
            CommandKind::Verack => Command::Verack(number(parsed, 0)?),
            CommandKind::Ping => Command::Ping(number(parsed, 0)?),
            CommandKind::Pong => Command::Pong(number(parsed, 0)?),
            CommandKind::Message => Command::Message(notice(parsed)?),
            CommandKind::Reject => Command::Reject(notice(parsed)?),
            CommandKind::Addr => {
                let count: usize = number(parsed, 0)?;
                let mut peers = Vec::with_capacity(count);
                for i in 0..count {
                    peers.push(PeerAddress {
                        last_seen: number(parsed, 1 + 2 * i)?,
                        addr: host(parsed, 2 + 2 * i)?,
                    });
                }
                Command::Addr(peers)
            }
            CommandKind::GetAddr => {
                if !fields.is_empty() {
                    return Err(internal(parsed, "unexpected payload"));
                }
                Command::GetAddr
            }
        };
        Ok(command)
    }
}

fn internal(parsed: &ParsedMessage, what: &str) -> P2pError {
    P2pError::Internal(format!("{}: {} in {:?}", parsed.command, what, parsed.fields))
}

fn field(parsed: &ParsedMessage, idx: usize) -> P2pResult<&str> {
    parsed
        .fields
        .get(idx)
        .map(String::as_str)
        .ok_or_else(|| internal(parsed, &format!("missing field {}", idx)))
}

fn number<T: std::str::FromStr>(parsed: &ParsedMessage, idx: usize) -> P2pResult<T> {
    field(parsed, idx)?
        .trim()
        .parse()
        .map_err(|_| internal(parsed, &format!("field {} is not numeric", idx)))
}

fn host(parsed: &ParsedMessage, idx: usize) -> P2pResult<HostAddr> {
    Ok(HostAddr::parse(field(parsed, idx)?)?)
}

fn notice(parsed: &ParsedMessage) -> P2pResult<Notice> {
    Ok(Notice {
        code: number(parsed, 0)?,
        reason: parsed.fields.get(1).cloned().unwrap_or_default(),
        detail: parsed.fields.get(2).cloned().unwrap_or_default(),
    })
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Version(v) => write!(
                f,
                "version|{}|{}|{}|{}|{}|{}|{}|{}",
                v.version,
                v.services,
                v.timestamp,
                v.recipient,
                v.sender,
                v.nonce,
                v.user_id,
                v.block_height
            ),
            Command::Verack(nonce) => write!(f, "verack|{}", nonce),
            Command::Message(n) => write!(f, "message|{}|{}|{}", n.code, n.reason, n.detail),
            Command::Reject(n) => write!(f, "reject|{}|{}|{}", n.code, n.reason, n.detail),
            Command::Ping(nonce) => write!(f, "ping|{}", nonce),
            Command::Pong(nonce) => write!(f, "pong|{}", nonce),
            Command::Addr(peers) => {
                write!(f, "addr|{}", peers.len())?;
                for peer in peers {
                    write!(f, "|{}|{}", peer.last_seen, peer.addr)?;
                }
                Ok(())
            }
            Command::GetAddr => write!(f, "getaddr"),
        }
    }
}

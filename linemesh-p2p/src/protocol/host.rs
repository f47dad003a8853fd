//! Host address literals (`<ip>:<port>`).

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a host literal is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostParseError {
    /// No `:` separating host and port.
    #[error("Invalid host format: '{0}'")]
    MissingPort(String),

    /// The host part is not an IPv4 or IPv6 literal.
    #[error("Hostname is an invalid hostname: '{0}'")]
    InvalidHostname(String),

    /// The port part is not a decimal integer.
    #[error("Port is NaN: '{0}'")]
    PortNotNumeric(String),

    /// The port is outside (0, 65535].
    #[error("Invalid port: '{0}'")]
    PortOutOfRange(String),
}

/// A `hostname:port` pair where the hostname is an IP literal.
///
/// Rendered without brackets, also for IPv6 (`::1:3000`), which is what
/// peers put on the wire. Parsing splits at the last colon, so both forms
/// round-trip; a bracketed IPv6 host is accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddr {
    /// IP literal.
    pub ip: IpAddr,
    /// Port in (0, 65535].
    pub port: u16,
}

impl HostAddr {
    /// Create a host address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Parse a `hostname:port` literal.
    pub fn parse(s: &str) -> Result<Self, HostParseError> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| HostParseError::MissingPort(s.to_string()))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let ip: IpAddr = host
            .parse()
            .map_err(|_| HostParseError::InvalidHostname(host.to_string()))?;

        let port: u64 = port
            .trim()
            .parse()
            .map_err(|_| HostParseError::PortNotNumeric(port.to_string()))?;
        if port == 0 || port > u64::from(u16::MAX) {
            return Err(HostParseError::PortOutOfRange(port.to_string()));
        }

        Ok(Self {
            ip,
            port: port as u16,
        })
    }

    /// The hostname as it appears on the wire.
    pub fn hostname(&self) -> String {
        self.ip.to_string()
    }

    /// Convert to a socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for HostAddr {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl FromStr for HostAddr {
    type Err = HostParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Compare two hostnames, tolerating an IPv4 address wrapped in IPv6
/// (`::ffff:1.2.3.4` against `1.2.3.4`).
pub fn hosts_match(a: &str, b: &str) -> bool {
    a == b || a.contains(b) || b.contains(a)
}

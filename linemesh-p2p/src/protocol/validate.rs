//! Per-command validation of raw protocol lines.
//!
//! Validators work on the raw line rather than on a [`ParsedMessage`]
//! because `parse` folds surplus delimiters into the last field. Each one
//! re-splits the line and checks its own segment count before looking at
//! field contents.
//!
//! [`ParsedMessage`]: crate::protocol::ParsedMessage

use std::net::SocketAddr;

use crate::config::{MAX_SERVICES, SUPPORTED_VERSIONS};
use crate::protocol::command::{Command, CommandKind, DELIMITER};
use crate::protocol::host::{hosts_match, HostAddr};

/// Informational status.
pub const CODE_INFO: u16 = 100;
/// Malformed or unacceptable input.
pub const CODE_BAD_REQUEST: u16 = 400;
/// The node cannot serve the request.
pub const CODE_UNAVAILABLE: u16 = 500;

/// Why a line (or a connection) was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Status-like error class.
    pub code: u16,
    /// Short reason.
    pub reason: String,
    /// Free-form details.
    pub details: String,
}

impl Rejection {
    /// Create a rejection.
    pub fn new(code: u16, reason: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            details: details.into(),
        }
    }

    /// A 400 rejection quoting the offending line.
    pub fn bad_request(reason: impl Into<String>, raw: &str) -> Self {
        Self::new(CODE_BAD_REQUEST, reason, format!("Received: {}", raw))
    }

    /// The `reject` command carrying this rejection.
    pub fn into_command(self) -> Command {
        Command::reject(i64::from(self.code), self.reason, self.details)
    }
}

/// Session state a validator may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    /// Local end of the socket the line arrived on.
    pub local_addr: SocketAddr,
    /// Remote end of the socket the line arrived on.
    pub remote_addr: SocketAddr,
    /// Nonce sent with our `version`, if any.
    pub version_nonce: Option<u64>,
    /// Nonce of the last `ping` we sent, if any.
    pub ping_nonce: Option<u64>,
}

/// Validate a raw line for the given command token.
pub fn is_valid(command: &str, line: &str, ctx: &ValidationContext) -> Result<(), Rejection> {
    let line = line.trim();
    let segments: Vec<&str> = line.split(DELIMITER).collect();
    let check = Check { line, segments };

    match CommandKind::from_name(command) {
        Some(CommandKind::Version) => check.version(ctx),
        Some(CommandKind::Verack) => check.nonce_echo(ctx.version_nonce),
        Some(CommandKind::Ping) => check
            .exactly(2)
            .and_then(|_| check.unsigned(1, "Nonce is NaN"))
            .map(drop),
        Some(CommandKind::Pong) => check.nonce_echo(ctx.ping_nonce),
        Some(CommandKind::Addr) => check.addr(),
        Some(CommandKind::GetAddr) => check.exactly(1),
        Some(CommandKind::Message) | Some(CommandKind::Reject) => check
            .at_least(4)
            .and_then(|_| check.signed(1, "Response code is NaN"))
            .map(drop),
        None => Err(Rejection::bad_request("Unrecognized command", line)),
    }
}

struct Check<'a> {
    line: &'a str,
    segments: Vec<&'a str>,
}

impl<'a> Check<'a> {
    fn fail(&self, reason: &str) -> Rejection {
        Rejection::bad_request(reason, self.line)
    }

    fn exactly(&self, count: usize) -> Result<(), Rejection> {
        if self.segments.len() != count {
            return Err(self.fail("Invalid # of params"));
        }
        Ok(())
    }

    fn at_least(&self, count: usize) -> Result<(), Rejection> {
        if self.segments.len() < count {
            return Err(self.fail("Invalid # of params"));
        }
        Ok(())
    }

    fn unsigned(&self, idx: usize, reason: &str) -> Result<u64, Rejection> {
        strict_unsigned(self.segments[idx]).ok_or_else(|| self.fail(reason))
    }

    fn signed(&self, idx: usize, reason: &str) -> Result<i64, Rejection> {
        strict_signed(self.segments[idx]).ok_or_else(|| self.fail(reason))
    }

    fn host(&self, idx: usize, reason: &str) -> Result<HostAddr, Rejection> {
        HostAddr::parse(self.segments[idx]).map_err(|_| self.fail(reason))
    }

    fn version(&self, ctx: &ValidationContext) -> Result<(), Rejection> {
        self.exactly(9)?;

        match strict_unsigned(self.segments[1]) {
            Some(v) if SUPPORTED_VERSIONS.iter().any(|s| u64::from(*s) == v) => {}
            _ => return Err(self.fail("Invalid version")),
        }

        let services = self.signed(2, "Service field is NaN")?;
        if services <= 0 || services > MAX_SERVICES {
            return Err(self.fail("Invalid service value"));
        }

        self.unsigned(3, "Current time field is NaN")?;

        let recipient = self.host(4, "Invalid recipient")?;
        if !hosts_match(&recipient.hostname(), &ctx.local_addr.ip().to_string())
            || recipient.port != ctx.local_addr.port()
        {
            return Err(self.fail("Recipient does not match"));
        }

        // The advertised port is the peer's listening port, not the
        // ephemeral one we observe, so only the host is compared.
        let sender = self.host(5, "Invalid sender")?;
        if !hosts_match(&sender.hostname(), &ctx.remote_addr.ip().to_string()) {
            return Err(self.fail("Sender does not match"));
        }

        self.unsigned(6, "Nonce is NaN")?;
        self.unsigned(8, "Block is NaN")?;
        Ok(())
    }

    fn nonce_echo(&self, expected: Option<u64>) -> Result<(), Rejection> {
        self.exactly(2)?;
        let nonce = self.unsigned(1, "Nonce is NaN")?;
        if expected != Some(nonce) {
            return Err(self.fail("Nonce does not match"));
        }
        Ok(())
    }

    fn addr(&self) -> Result<(), Rejection> {
        self.at_least(2)?;
        let count = self.unsigned(1, "Number of peers is NaN")?;

        let payload = self.segments.len() - 2;
        if payload % 2 != 0 || (payload / 2) as u64 != count {
            return Err(self.fail("Number of peers does not match list length"));
        }

        for pair in self.segments[2..].chunks(2) {
            if strict_unsigned(pair[0]).is_none() {
                return Err(self.fail("Active time is NaN"));
            }
            if HostAddr::parse(pair[1]).is_err() {
                return Err(self.fail("Invalid peer"));
            }
        }
        Ok(())
    }
}

fn strict_unsigned(field: &str) -> Option<u64> {
    let field = field.trim();
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

fn strict_signed(field: &str) -> Option<i64> {
    let field = field.trim();
    let digits = field.strip_prefix('-').unwrap_or(field);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::{command_token, parse};

    fn ctx() -> ValidationContext {
        ValidationContext {
            local_addr: "127.0.0.1:3000".parse().unwrap(),
            remote_addr: "127.0.0.1:51234".parse().unwrap(),
            version_nonce: Some(77),
            ping_nonce: Some(99),
        }
    }

    fn version_line(version: &str, services: &str, recipient: &str, sender: &str) -> String {
        format!(
            "version|{}|{}|1700000000|{}|{}|12345|beta|10",
            version, services, recipient, sender
        )
    }

    fn reason(result: Result<(), Rejection>) -> String {
        result.unwrap_err().reason
    }

    #[test]
    fn test_valid_version() {
        let line = version_line("3", "1", "127.0.0.1:3000", "127.0.0.1:4000");
        assert!(is_valid("version", &line, &ctx()).is_ok());

        let line = version_line("4", "7", "::ffff:127.0.0.1:3000", "127.0.0.1:4000");
        assert!(is_valid("version", &line, &ctx()).is_ok());
    }

    #[test]
    fn test_version_failures() {
        let c = ctx();
        let cases = [
            (version_line("2", "1", "127.0.0.1:3000", "127.0.0.1:4000"), "Invalid version"),
            (version_line("3", "0", "127.0.0.1:3000", "127.0.0.1:4000"), "Invalid service value"),
            (version_line("3", "8", "127.0.0.1:3000", "127.0.0.1:4000"), "Invalid service value"),
            (version_line("3", "x", "127.0.0.1:3000", "127.0.0.1:4000"), "Service field is NaN"),
            (
                version_line("3", "1", "127.0.0.1:3001", "127.0.0.1:4000"),
                "Recipient does not match",
            ),
            (version_line("3", "1", "10.0.0.1:3000", "127.0.0.1:4000"), "Recipient does not match"),
            (version_line("3", "1", "nowhere", "127.0.0.1:4000"), "Invalid recipient"),
            (version_line("3", "1", "127.0.0.1:3000", "10.9.9.9:4000"), "Sender does not match"),
            (version_line("3", "1", "127.0.0.1:3000", "127.0.0.1:99999"), "Invalid sender"),
        ];
        for (line, expected) in cases {
            assert_eq!(reason(is_valid("version", &line, &c)), expected, "{}", line);
        }

        let bad_time = "version|3|1|soon|127.0.0.1:3000|127.0.0.1:4000|1|beta|10";
        assert_eq!(reason(is_valid("version", bad_time, &c)), "Current time field is NaN");
        let bad_nonce = "version|3|1|1|127.0.0.1:3000|127.0.0.1:4000|12ab|beta|10";
        assert_eq!(reason(is_valid("version", bad_nonce, &c)), "Nonce is NaN");
        let bad_block = "version|3|1|1|127.0.0.1:3000|127.0.0.1:4000|1|beta|tip";
        assert_eq!(reason(is_valid("version", bad_block, &c)), "Block is NaN");
        let short = "version|3|1|1|127.0.0.1:3000";
        assert_eq!(reason(is_valid("version", short, &c)), "Invalid # of params");
    }

    #[test]
    fn test_rejection_details_quote_line() {
        let rejection = is_valid("ping", "ping|abc", &ctx()).unwrap_err();
        assert_eq!(rejection.code, CODE_BAD_REQUEST);
        assert_eq!(rejection.reason, "Nonce is NaN");
        assert_eq!(rejection.details, "Received: ping|abc");
        assert_eq!(
            rejection.into_command().to_string(),
            "reject|400|Nonce is NaN|Received: ping|abc"
        );
    }

    #[test]
    fn test_nonce_echo() {
        let c = ctx();
        assert!(is_valid("verack", "verack|77", &c).is_ok());
        assert_eq!(reason(is_valid("verack", "verack|78", &c)), "Nonce does not match");
        assert!(is_valid("pong", "pong|99", &c).is_ok());
        assert_eq!(reason(is_valid("pong", "pong|98", &c)), "Nonce does not match");

        let fresh = ValidationContext {
            version_nonce: None,
            ping_nonce: None,
            ..c
        };
        assert_eq!(reason(is_valid("verack", "verack|77", &fresh)), "Nonce does not match");
        assert_eq!(reason(is_valid("pong", "pong|99", &fresh)), "Nonce does not match");
    }

    #[test]
    fn test_ping_accepts_any_number() {
        assert!(is_valid("ping", "ping|18446744073709551615", &ctx()).is_ok());
        assert_eq!(reason(is_valid("ping", "ping", &ctx())), "Invalid # of params");
        assert_eq!(reason(is_valid("ping", "ping|1|2", &ctx())), "Invalid # of params");
        assert_eq!(reason(is_valid("ping", "ping|-1", &ctx())), "Nonce is NaN");
    }

    #[test]
    fn test_addr_counts() {
        let c = ctx();
        assert!(is_valid("addr", "addr|0", &c).is_ok());
        assert!(is_valid("addr", "addr|2|100|1.2.3.4:9|200|5.6.7.8:9", &c).is_ok());
        assert_eq!(
            reason(is_valid("addr", "addr|2|100|1.2.3.4:9|200", &c)),
            "Number of peers does not match list length"
        );
        assert_eq!(
            reason(is_valid("addr", "addr|3|100|1.2.3.4:9|200|5.6.7.8:9", &c)),
            "Number of peers does not match list length"
        );
        assert_eq!(reason(is_valid("addr", "addr|two", &c)), "Number of peers is NaN");
        assert_eq!(
            reason(is_valid("addr", "addr|1|later|1.2.3.4:9", &c)),
            "Active time is NaN"
        );
        assert_eq!(reason(is_valid("addr", "addr|1|100|1.2.3.4", &c)), "Invalid peer");
        assert_eq!(reason(is_valid("addr", "addr", &c)), "Invalid # of params");
    }

    #[test]
    fn test_padded_hosts_rejected() {
        let c = ctx();
        assert_eq!(reason(is_valid("addr", "addr|1|100| 1.2.3.4:9", &c)), "Invalid peer");

        let line = version_line("3", "1", " 127.0.0.1:3000", "127.0.0.1:4000");
        assert_eq!(reason(is_valid("version", &line, &c)), "Invalid recipient");
        let line = version_line("3", "1", "127.0.0.1:3000", " 127.0.0.1:4000");
        assert_eq!(reason(is_valid("version", &line, &c)), "Invalid sender");
    }

    #[test]
    fn test_accepted_lines_decode() {
        let c = ctx();
        let lines = [
            version_line("3", "1", "127.0.0.1:3000", "127.0.0.1:4000"),
            version_line("4", "7", "::ffff:127.0.0.1:3000", "127.0.0.1:4000"),
            "verack|77".to_string(),
            "ping|5".to_string(),
            "pong|99".to_string(),
            "addr|2|100|1.2.3.4:9 |200|5.6.7.8:9".to_string(),
            "message|100|ok|fine".to_string(),
            "reject|-1|odd|Received: x|y".to_string(),
            "getaddr".to_string(),
        ];
        for line in &lines {
            let token = command_token(line);
            assert!(is_valid(token, line, &c).is_ok(), "{}", line);
            let parsed = parse(line).unwrap();
            assert!(Command::from_parsed(&parsed).is_ok(), "{}", line);
        }
    }

    #[test]
    fn test_notices_and_getaddr() {
        let c = ctx();
        assert!(is_valid("getaddr", "getaddr", &c).is_ok());
        assert_eq!(reason(is_valid("getaddr", "getaddr|1", &c)), "Invalid # of params");
        let established = "message|100|Connection established|Handshake complete";
        assert!(is_valid("message", established, &c).is_ok());
        assert!(is_valid("reject", "reject|-1|odd|Received: x|y", &c).is_ok());
        assert_eq!(reason(is_valid("reject", "reject|400|short", &c)), "Invalid # of params");
        assert_eq!(reason(is_valid("message", "message|ok|a|b", &c)), "Response code is NaN");
    }

    #[test]
    fn test_unknown_command() {
        let rejection = is_valid("history", "history|1", &ctx()).unwrap_err();
        assert_eq!(rejection.code, CODE_BAD_REQUEST);
        assert_eq!(rejection.reason, "Unrecognized command");
    }

    #[test]
    fn test_strict_numbers() {
        assert_eq!(strict_unsigned(" 42 "), Some(42));
        assert_eq!(strict_unsigned("42abc"), None);
        assert_eq!(strict_unsigned("+42"), None);
        assert_eq!(strict_unsigned(""), None);
        assert_eq!(strict_signed("-5"), Some(-5));
        assert_eq!(strict_signed("-"), None);
    }
}

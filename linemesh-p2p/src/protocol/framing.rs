//! CRLF line framing codec.
//!
//! Lines are framed as:
//! - N bytes: the line, without the terminator
//! - 2 bytes: `\r\n`

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_LINE_LENGTH;
use crate::error::{P2pError, P2pResult};
use crate::protocol::Command;

const TERMINATOR: &[u8] = b"\r\n";

/// Codec for CRLF-terminated protocol lines.
#[derive(Debug)]
pub struct LineCodec {
    /// Longest accepted line, terminator excluded.
    max_length: usize,
    /// Bytes already scanned for a terminator.
    next_index: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a codec with the default length limit.
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom length limit.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = P2pError;

    fn decode(&mut self, src: &mut BytesMut) -> P2pResult<Option<Self::Item>> {
        // Back up one byte in case the last read ended between '\r' and '\n'
        let start = self.next_index.saturating_sub(1).min(src.len());
        let found = src[start..]
            .windows(TERMINATOR.len())
            .position(|w| w == TERMINATOR)
            .map(|pos| start + pos);

        match found {
            Some(end) => {
                self.next_index = 0;
                if end > self.max_length {
                    return Err(P2pError::MessageTooLarge {
                        size: end,
                        max: self.max_length,
                    });
                }
                let line = src.split_to(end + TERMINATOR.len());
                Ok(Some(String::from_utf8_lossy(&line[..end]).into_owned()))
            }
            None => {
                if src.len() > self.max_length + 1 {
                    return Err(P2pError::MessageTooLarge {
                        size: src.len(),
                        max: self.max_length,
                    });
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }
}

impl Encoder<Command> for LineCodec {
    type Error = P2pError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> P2pResult<()> {
        let line = command.to_string();
        let line = line.trim_end();

        dst.reserve(line.len() + TERMINATOR.len());
        dst.put_slice(line.as_bytes());
        dst.put_slice(TERMINATOR);

        Ok(())
    }
}

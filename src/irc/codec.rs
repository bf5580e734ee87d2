//! Inbound line framing for the IRC reader.
//!
//! IRC has no mandated text encoding, so lines are split on raw `\n` bytes
//! and decoded lossily. Lines longer than the cap are discarded whole.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

/// Longest accepted line: 8191 bytes of IRCv3 tags plus a 512-byte message.
pub const MAX_LINE_LENGTH: usize = 8703;

/// Splits a byte stream into text lines without their `\r\n` terminator.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    discarding: bool,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

impl LineCodec {
    /// Codec that discards lines longer than `max_length` bytes.
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            discarding: false,
        }
    }

    /// Whether the codec is skipping the rest of an overlong line.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let Some(newline) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_length {
                    if !self.discarding {
                        warn!(max_length = self.max_length, "discarding overlong irc line");
                    }
                    src.clear();
                    self.discarding = true;
                }
                return Ok(None);
            };

            let raw = src.split_to(newline);
            src.advance(1);

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if raw.len() > self.max_length {
                warn!(max_length = self.max_length, "discarding overlong irc line");
                continue;
            }
            return Ok(Some(decode_line(&raw)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() || self.discarding {
            src.clear();
            return Ok(None);
        }
        let raw = src.split();
        Ok(Some(decode_line(&raw)))
    }
}

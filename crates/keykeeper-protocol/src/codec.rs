//! Tokio codec for the firmware's serial console.
//!
//! The console is a plain text shell: every line the firmware prints ends in
//! `\r\n` and log lines are colored with ANSI escape sequences. The
//! [`FirmwareLineCodec`] turns the raw byte stream into clean text lines and
//! frames outgoing commands with the `\r\n` terminator the shell expects.
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use tokio_util::codec::Framed;
//! use keykeeper_protocol::FirmwareLineCodec;
//!
//! # async fn example(port: tokio::io::DuplexStream) -> Result<(), keykeeper_protocol::CodecError> {
//! let mut framed = Framed::new(port, FirmwareLineCodec::new());
//!
//! framed.send("stats bonds").await?;
//! while let Some(line) = framed.next().await {
//!     let line = line?;
//!     if line == "done" {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Decoding Rules
//!
//! - Lines are split on `\n`; a trailing `\r` is dropped
//! - Invalid UTF-8 is replaced rather than rejected, because a reset
//!   firmware often prints a few garbage bytes first
//! - ANSI escape sequences are removed after decoding
//! - A line longer than the configured maximum is an error

use std::borrow::Cow;
use std::sync::LazyLock;

use bytes::{BufMut, BytesMut};
use regex::Regex;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum line length in bytes (4 KB).
///
/// The longest legitimate line is a `coin add` echo of roughly 160 bytes.
const DEFAULT_MAX_LINE_LENGTH: usize = 4 * 1024;

/// Escape sequence: ESC, a Fe byte, parameter bytes, intermediate bytes and
/// a final byte.
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B[@-_][0-?]*[ -/]*[@-~]").expect("valid ANSI regex"));

/// Errors produced while framing console lines.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A line exceeded the maximum length without a terminator.
    #[error("Line too long: more than {max_length} bytes without newline")]
    LineTooLong { max_length: usize },

    /// I/O error from the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remove ANSI escape sequences from a decoded line.
///
/// # Example
///
/// ```
/// use keykeeper_protocol::strip_ansi;
///
/// let colored = "\x1b[0m\x1b[1;32m<inf> app: Battery Level: 73%\x1b[0m";
/// assert_eq!(strip_ansi(colored), "<inf> app: Battery Level: 73%");
/// ```
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

/// Codec turning the console byte stream into text lines.
#[derive(Debug, Clone)]
pub struct FirmwareLineCodec {
    /// Index up to which the buffer is known to hold no newline.
    next_index: usize,

    /// Maximum allowed line length in bytes.
    max_length: usize,
}

impl FirmwareLineCodec {
    /// Create a codec with the default maximum line length.
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom maximum line length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
        }
    }

    /// Get the current maximum line length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn decode_line(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        let text = String::from_utf8_lossy(bytes);
        strip_ansi(&text).into_owned()
    }
}

impl Default for FirmwareLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FirmwareLineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, CodecError> {
        let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

        match newline {
            Some(offset) => {
                let end = self.next_index + offset;
                let line = src.split_to(end + 1);
                self.next_index = 0;
                let content = line[..end].strip_suffix(b"\r").unwrap_or(&line[..end]);
                if content.len() > self.max_length {
                    // The oversized line is dropped; later lines stay buffered.
                    return Err(CodecError::LineTooLong {
                        max_length: self.max_length,
                    });
                }
                Ok(Some(Self::decode_line(&line)))
            }
            None if src.len() > self.max_length => {
                // Drop the runaway data so the stream can resynchronize.
                src.clear();
                self.next_index = 0;
                Err(CodecError::LineTooLong {
                    max_length: self.max_length,
                })
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, CodecError> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        self.next_index = 0;
        Ok(Some(Self::decode_line(&rest)))
    }
}

impl<T: AsRef<str>> Encoder<T> for FirmwareLineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let line = item.as_ref();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

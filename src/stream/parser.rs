//! Incremental frame parser for the reply event stream
//!
//! The model service answers a streaming request with a line-oriented
//! event stream:
//!
//! ```text
//! data: {"type":"start"}
//!
//! data: {"type":"chunk","content":"Hel"}
//!
//! data: {"type":"done"}
//! ```
//!
//! Fragments arrive at arbitrary byte boundaries, so [`FrameParser`] keeps
//! a carry-over buffer holding the trailing incomplete line (and any
//! incomplete UTF-8 sequence) until the next fragment completes it.

use serde::Deserialize;

/// Prefix that marks an event line
pub const EVENT_PREFIX: &str = "data: ";

/// Message used when an `error` envelope carries no text
pub const DEFAULT_STREAM_ERROR: &str = "Streaming error";

/// One decoded event from the stream
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// The service has begun producing a reply
    Start,
    /// A fragment of reply text
    Chunk {
        /// Text to append to the accumulated reply
        #[serde(default)]
        content: String,
    },
    /// The reply is complete
    Done,
    /// The service failed mid-reply
    Error {
        /// Description of the failure
        #[serde(default = "default_stream_error")]
        error: String,
    },
}

fn default_stream_error() -> String {
    DEFAULT_STREAM_ERROR.to_string()
}

impl Envelope {
    /// Whether this envelope ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Decode a single complete line
///
/// Returns `None` for lines without the event prefix and for payloads that
/// fail to decode; neither aborts the stream.
///
/// # Examples
///
/// ```
/// use chatwire::stream::parser::{decode_line, Envelope};
///
/// assert_eq!(decode_line(r#"data: {"type":"done"}"#), Some(Envelope::Done));
/// assert_eq!(decode_line("data: not json"), None);
/// assert_eq!(decode_line(""), None);
/// ```
pub fn decode_line(line: &str) -> Option<Envelope> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(EVENT_PREFIX)?;

    match serde_json::from_str::<Envelope>(payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::debug!("Skipping undecodable stream line: {} ({})", payload, e);
            None
        }
    }
}

/// Stateful line reassembler and envelope decoder
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Trailing text after the last line terminator
    carry: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending_bytes: Vec<u8>,
}

impl FrameParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text fragment and return every envelope it completes
    ///
    /// # Examples
    ///
    /// ```
    /// use chatwire::stream::parser::{Envelope, FrameParser};
    ///
    /// let mut parser = FrameParser::new();
    /// assert!(parser.feed("data: {\"type\":\"chu").is_empty());
    /// let events = parser.feed("nk\",\"content\":\"hi\"}\n\n");
    /// assert_eq!(events, vec![Envelope::Chunk { content: "hi".into() }]);
    /// ```
    pub fn feed(&mut self, fragment: &str) -> Vec<Envelope> {
        self.carry.push_str(fragment);

        let Some(last_newline) = self.carry.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);

        complete.split('\n').filter_map(decode_line).collect()
    }

    /// Feed raw bytes, carrying any split multi-byte character forward
    ///
    /// Invalid UTF-8 inside the fragment is replaced rather than rejected;
    /// the affected line then fails to decode and is skipped. An incomplete
    /// sequence at the very end is held back even when earlier bytes were
    /// invalid.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<Envelope> {
        self.pending_bytes.extend_from_slice(bytes);
        let buffer = std::mem::take(&mut self.pending_bytes);

        let mut text = String::with_capacity(buffer.len());
        let mut rest = buffer.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending_bytes = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        self.feed(&text)
    }

    /// Flush the carry-over at end of input
    ///
    /// A final line that lacks a terminator is still decoded.
    pub fn finish(&mut self) -> Option<Envelope> {
        if !self.pending_bytes.is_empty() {
            let tail = std::mem::take(&mut self.pending_bytes);
            self.carry.push_str(&String::from_utf8_lossy(&tail));
        }
        let last = std::mem::take(&mut self.carry);
        decode_line(&last)
    }

    /// Length of the buffered, not yet terminated text
    pub fn buffered_len(&self) -> usize {
        self.carry.len() + self.pending_bytes.len()
    }
}

//! Reply stream decoding and update throttling
//!
//! - [`parser`] reassembles lines from arbitrary fragments and decodes
//!   envelopes.
//! - [`throttle`] bounds how often accumulated content reaches the
//!   session store.
//!
//! [`EnvelopeReader`] ties the parser to a live byte stream and turns the
//! protocol's failure modes into typed errors.

pub mod parser;
pub mod throttle;

pub use parser::{Envelope, FrameParser};
pub use throttle::{StreamCursor, UpdateScheduler};

use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt;

use crate::error::{ChatwireError, Result};
use crate::service::ByteStream;

/// Pulls envelopes out of a reply byte stream one at a time
///
/// Yields `start` and `chunk` envelopes, then `done` exactly once, then
/// `None`. Every other ending is an error:
///
/// - a failed read is [`ChatwireError::Transport`]
/// - an `error` envelope is [`ChatwireError::Protocol`]
/// - end of input without `done` is [`ChatwireError::UnexpectedEndOfStream`]
pub struct EnvelopeReader {
    body: ByteStream,
    parser: FrameParser,
    ready: VecDeque<Envelope>,
    idle_timeout: Option<Duration>,
    /// Body returned `None`; it must not be polled again
    body_done: bool,
    finished: bool,
}

impl EnvelopeReader {
    /// Wrap a byte stream
    pub fn new(body: ByteStream) -> Self {
        Self {
            body,
            parser: FrameParser::new(),
            ready: VecDeque::new(),
            idle_timeout: None,
            body_done: false,
            finished: false,
        }
    }

    /// Treat a read that stalls for longer than `timeout` as a transport error
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Next envelope, `Ok(None)` after `done`
    pub async fn next(&mut self) -> Result<Option<Envelope>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if let Some(envelope) = self.ready.pop_front() {
                return self.emit(envelope);
            }

            match self.read_fragment().await? {
                Some(bytes) => {
                    let envelopes = self.parser.feed_bytes(&bytes);
                    self.ready.extend(envelopes);
                }
                None => {
                    if let Some(last) = self.parser.finish() {
                        self.ready.push_back(last);
                        continue;
                    }
                    self.finished = true;
                    return Err(ChatwireError::UnexpectedEndOfStream.into());
                }
            }
        }
    }

    fn emit(&mut self, envelope: Envelope) -> Result<Option<Envelope>> {
        match envelope {
            Envelope::Error { error } => {
                self.finished = true;
                Err(ChatwireError::Protocol(error).into())
            }
            Envelope::Done => {
                self.finished = true;
                Ok(Some(Envelope::Done))
            }
            other => Ok(Some(other)),
        }
    }

    async fn read_fragment(&mut self) -> Result<Option<bytes::Bytes>> {
        if self.body_done {
            return Ok(None);
        }

        let next = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.finished = true;
                    return Err(ChatwireError::Transport(format!(
                        "no data received for {} ms",
                        limit.as_millis()
                    ))
                    .into());
                }
            },
            None => self.body.next().await,
        };

        match next {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => {
                self.finished = true;
                Err(ChatwireError::Transport(format!("stream read failed: {}", e)).into())
            }
            None => {
                self.body_done = true;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatwireError;
    use bytes::Bytes;

    fn body_of(parts: &[&str]) -> ByteStream {
        let items: Vec<Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        Box::pin(futures::stream::iter(items))
    }

    fn kind(err: &anyhow::Error) -> &ChatwireError {
        err.downcast_ref::<ChatwireError>().expect("typed error")
    }

    #[tokio::test]
    async fn test_reads_until_done() {
        let mut reader = EnvelopeReader::new(body_of(&[
            "data: {\"type\":\"start\"}\n\ndata: {\"type\":\"chu",
            "nk\",\"content\":\"hi\"}\n\ndata: {\"type\":\"done\"}\n\n",
            "data: {\"type\":\"chunk\",\"content\":\"ignored\"}\n\n",
        ]));

        assert_eq!(reader.next().await.unwrap(), Some(Envelope::Start));
        assert_eq!(
            reader.next().await.unwrap(),
            Some(Envelope::Chunk {
                content: "hi".into()
            })
        );
        assert_eq!(reader.next().await.unwrap(), Some(Envelope::Done));
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_envelope_is_protocol_error() {
        let mut reader = EnvelopeReader::new(body_of(&[
            "data: {\"type\":\"start\"}\n\n",
            "data: {\"type\":\"error\",\"error\":\"model unavailable\"}\n\n",
        ]));

        assert_eq!(reader.next().await.unwrap(), Some(Envelope::Start));
        let err = reader.next().await.unwrap_err();
        assert!(matches!(kind(&err), ChatwireError::Protocol(m) if m == "model unavailable"));
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_after_start_is_unexpected_end() {
        let mut reader = EnvelopeReader::new(body_of(&["data: {\"type\":\"start\"}\n\n"]));
        assert_eq!(reader.next().await.unwrap(), Some(Envelope::Start));
        let err = reader.next().await.unwrap_err();
        assert!(matches!(kind(&err), ChatwireError::UnexpectedEndOfStream));
    }

    #[tokio::test]
    async fn test_empty_body_is_unexpected_end() {
        let mut reader = EnvelopeReader::new(body_of(&[]));
        let err = reader.next().await.unwrap_err();
        assert!(matches!(kind(&err), ChatwireError::UnexpectedEndOfStream));
    }

    #[tokio::test]
    async fn test_unterminated_done_still_completes() {
        let mut reader = EnvelopeReader::new(body_of(&["data: {\"type\":\"done\"}"]));
        assert_eq!(reader.next().await.unwrap(), Some(Envelope::Done));
    }

    #[tokio::test]
    async fn test_read_failure_is_transport_error() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"start\"}\n\n")),
            Err(anyhow::anyhow!("connection reset")),
        ];
        let mut reader = EnvelopeReader::new(Box::pin(futures::stream::iter(items)));
        assert_eq!(reader.next().await.unwrap(), Some(Envelope::Start));
        let err = reader.next().await.unwrap_err();
        assert!(matches!(kind(&err), ChatwireError::Transport(_)));
    }

    #[tokio::test]
    async fn test_body_is_not_polled_after_it_ends() {
        // Unfold panics if polled again after yielding `None`.
        let body: ByteStream = Box::pin(futures::stream::unfold(false, |sent| async move {
            if sent {
                None
            } else {
                Some((
                    Ok::<Bytes, anyhow::Error>(Bytes::from_static(b"data: {\"type\":\"start\"}")),
                    true,
                ))
            }
        }));
        let mut reader = EnvelopeReader::new(body);

        assert_eq!(reader.next().await.unwrap(), Some(Envelope::Start));
        let err = reader.next().await.unwrap_err();
        assert!(matches!(kind(&err), ChatwireError::UnexpectedEndOfStream));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_is_transport_error() {
        let body: ByteStream = Box::pin(futures::stream::pending());
        let mut reader = EnvelopeReader::new(body).with_idle_timeout(Some(Duration::from_secs(5)));
        let err = reader.next().await.unwrap_err();
        assert!(matches!(kind(&err), ChatwireError::Transport(_)));
    }
}

//! Model service abstraction
//!
//! The engine talks to the model through [`ModelService`]: one streaming
//! request whose body is read incrementally, and one synchronous request
//! used as the fallback path. [`HttpModelService`] is the production
//! implementation; tests substitute in-process fakes.

pub mod http;

pub use http::HttpModelService;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::{Message, Role};

/// Raw reply body, delivered as arbitrarily sized chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A history item as sent to the model service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message
    pub role: Role,
    /// Message body
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Request body shared by the streaming and synchronous endpoints
#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub(crate) messages: &'a [ChatMessage],
}

/// Response body of the synchronous endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct CompletionBody {
    pub(crate) content: String,
}

/// Remote model endpoint
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Start a streamed reply for `history`
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatwireError::Transport`] if the request
    /// fails, the status is not a success, or there is no body to read.
    async fn open_stream(&self, history: &[ChatMessage]) -> Result<ByteStream>;

    /// Produce the complete reply for `history` in one response
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatwireError::FallbackFailed`] on any
    /// failure.
    async fn complete(&self, history: &[ChatMessage]) -> Result<String>;
}

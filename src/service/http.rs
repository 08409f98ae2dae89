//! HTTP implementation of the model service
//!
//! Streaming replies are read from `POST {base_url}{stream_path}` as an
//! event stream; the fallback is `POST {base_url}{complete_path}` returning
//! `{"content": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;

use crate::config::ServiceConfig;
use crate::error::{ChatwireError, Result};
use crate::service::{ByteStream, ChatMessage, ChatRequest, CompletionBody, ModelService};

/// Model service reached over HTTP
///
/// # Examples
///
/// ```
/// use chatwire::config::ServiceConfig;
/// use chatwire::service::HttpModelService;
///
/// let service = HttpModelService::new(ServiceConfig::default());
/// assert!(service.is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct HttpModelService {
    stream_client: Client,
    complete_client: Client,
    config: ServiceConfig,
}

impl HttpModelService {
    /// Create a new HTTP model service
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(config: ServiceConfig) -> Result<Self> {
        // The streaming client has no overall deadline: a reply may take as
        // long as the model needs.
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("chatwire/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatwireError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let complete_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(concat!("chatwire/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatwireError::Config(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!("Initialized model service: base_url={}", config.base_url);

        Ok(Self {
            stream_client,
            complete_client,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ModelService for HttpModelService {
    async fn open_stream(&self, history: &[ChatMessage]) -> Result<ByteStream> {
        let url = self.url(&self.config.stream_path);
        tracing::debug!("Opening reply stream: {} ({} messages)", url, history.len());

        let response = self
            .stream_client
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&ChatRequest { messages: history })
            .send()
            .await
            .map_err(|e| ChatwireError::Transport(format!("stream request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatwireError::Transport(format!(
                "stream request returned {}: {}",
                status, error_text
            ))
            .into());
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| anyhow::Error::new(ChatwireError::Http(e))));
        Ok(Box::pin(body))
    }

    async fn complete(&self, history: &[ChatMessage]) -> Result<String> {
        let url = self.url(&self.config.complete_path);
        tracing::debug!("Requesting full reply: {} ({} messages)", url, history.len());

        let response = self
            .complete_client
            .post(&url)
            .json(&ChatRequest { messages: history })
            .send()
            .await
            .map_err(|e| ChatwireError::FallbackFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Model service returned error {}: {}", status, error_text);
            return Err(ChatwireError::FallbackFailed(format!(
                "model service returned {}: {}",
                status, error_text
            ))
            .into());
        }

        let body: CompletionBody = response.json().await.map_err(|e| {
            ChatwireError::FallbackFailed(format!("failed to parse reply: {}", e))
        })?;

        Ok(body.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = ServiceConfig {
            base_url: "http://localhost:3000/".to_string(),
            ..ServiceConfig::default()
        };
        let service = HttpModelService::new(config).unwrap();
        assert_eq!(
            service.url("/api/chat"),
            "http://localhost:3000/api/chat"
        );
    }

    #[tokio::test]
    async fn test_complete_connection_refused_is_fallback_failure() {
        let config = ServiceConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            request_timeout_seconds: 2,
            ..ServiceConfig::default()
        };
        let service = HttpModelService::new(config).unwrap();
        let history = vec![ChatMessage {
            role: Role::User,
            content: "hi".into(),
        }];
        let err = service.complete(&history).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatwireError>(),
            Some(ChatwireError::FallbackFailed(_))
        ));
    }
}

//! HTTP client for the remote conversation store
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create | `POST /api/chats` |
//! | fetch | `GET /api/chats/{id}` |
//! | update | `PUT /api/chats/{id}` |
//! | append message | `POST /api/messages/{id}` |
//! | delete | `DELETE /api/chats/{id}` |
//! | list | `GET /api/chats?userId={owner}` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};

use crate::error::{ChatwireError, Result};
use crate::persistence::{
    AppendMessageRequest, CreateSessionRequest, RemoteMessage, RemoteSession, RemoteStore,
    UpdateSessionRequest,
};

const COLLECTION_PATH: &str = "/api/chats";
const MESSAGES_PATH: &str = "/api/messages";

/// Remote store reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
}

impl HttpRemoteStore {
    /// Create a client for the store at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("chatwire/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatwireError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}{}", self.base_url, COLLECTION_PATH)
    }

    fn record_url(&self, remote_id: &str) -> String {
        format!("{}{}/{}", self.base_url, COLLECTION_PATH, remote_id)
    }

    fn messages_url(&self, remote_id: &str) -> String {
        format!("{}{}/{}", self.base_url, MESSAGES_PATH, remote_id)
    }
}

/// Turn a non-success response into a typed error
async fn check_status(response: Response, remote_id: Option<&str>) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND {
        if let Some(id) = remote_id {
            return Err(ChatwireError::NotFound(id.to_string()).into());
        }
    }

    let error_text = response.text().await.unwrap_or_default();
    Err(ChatwireError::Persistence(format!("store returned {}: {}", status, error_text)).into())
}

fn send_error(e: reqwest::Error) -> anyhow::Error {
    ChatwireError::Persistence(format!("request failed: {}", e)).into()
}

fn decode_error(e: reqwest::Error) -> anyhow::Error {
    ChatwireError::Persistence(format!("failed to parse store response: {}", e)).into()
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(&self, request: &CreateSessionRequest) -> Result<RemoteSession> {
        tracing::debug!(
            "Creating remote session '{}' ({} messages)",
            request.title,
            request.messages.len()
        );
        let response = self
            .client
            .post(self.collection_url())
            .json(request)
            .send()
            .await
            .map_err(send_error)?;

        let response = check_status(response, None).await?;
        response.json().await.map_err(decode_error)
    }

    async fn fetch(&self, remote_id: &str) -> Result<RemoteSession> {
        let response = self
            .client
            .get(self.record_url(remote_id))
            .send()
            .await
            .map_err(send_error)?;

        let response = check_status(response, Some(remote_id)).await?;
        response.json().await.map_err(decode_error)
    }

    async fn update(
        &self,
        remote_id: &str,
        request: &UpdateSessionRequest,
    ) -> Result<RemoteSession> {
        tracing::debug!("Updating remote session {}", remote_id);
        let response = self
            .client
            .put(self.record_url(remote_id))
            .json(request)
            .send()
            .await
            .map_err(send_error)?;

        let response = check_status(response, Some(remote_id)).await?;
        response.json().await.map_err(decode_error)
    }

    async fn append_message(
        &self,
        remote_id: &str,
        message: &RemoteMessage,
    ) -> Result<RemoteSession> {
        tracing::debug!("Appending {} message to remote session {}", message.role, remote_id);
        let request = AppendMessageRequest {
            message: message.clone(),
        };
        let response = self
            .client
            .post(self.messages_url(remote_id))
            .json(&request)
            .send()
            .await
            .map_err(send_error)?;

        let response = check_status(response, Some(remote_id)).await?;
        response.json().await.map_err(decode_error)
    }

    async fn delete(&self, remote_id: &str) -> Result<()> {
        tracing::debug!("Deleting remote session {}", remote_id);
        let response = self
            .client
            .delete(self.record_url(remote_id))
            .send()
            .await
            .map_err(send_error)?;

        check_status(response, Some(remote_id)).await?;
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<RemoteSession>> {
        let response = self
            .client
            .get(self.collection_url())
            .query(&[("userId", owner_id)])
            .send()
            .await
            .map_err(send_error)?;

        let response = check_status(response, None).await?;
        let sessions: Vec<RemoteSession> = response.json().await.map_err(decode_error)?;
        tracing::debug!("Listed {} remote sessions", sessions.len());
        Ok(sessions)
    }
}

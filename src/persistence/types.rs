use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChatwireError, Result};
use crate::session::{Message, MessageId, Role, Session};

/// A message as recorded by the remote conversation store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    /// Local message identifier, echoed back on load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// One of `user`, `assistant`, `system`
    pub role: String,
    /// Message body
    pub content: String,
    /// When the message was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RemoteMessage {
    /// Check the record against what the remote store accepts
    ///
    /// # Errors
    ///
    /// Returns [`ChatwireError::InvalidMessage`] if the role is not one of
    /// the known roles or the content is empty.
    pub fn validate(&self) -> Result<()> {
        self.role.parse::<Role>()?;
        if self.content.trim().is_empty() {
            return Err(ChatwireError::InvalidMessage("content cannot be empty".to_string()).into());
        }
        Ok(())
    }

    /// Convert back into a local message, rejecting invalid records
    pub fn into_message(self) -> Result<Message> {
        self.validate()?;
        let role = self.role.parse::<Role>()?;
        let mut message = Message::new(role, self.content);
        if let Some(id) = self.id.filter(|id| !id.is_empty()) {
            message.id = MessageId::from(id.as_str());
        }
        if let Some(timestamp) = self.timestamp {
            message.timestamp = timestamp;
        }
        Ok(message)
    }
}

impl From<&Message> for RemoteMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: Some(message.id.to_string()),
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            timestamp: Some(message.timestamp),
        }
    }
}

/// A session as returned by the remote conversation store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSession {
    /// Durable identifier assigned by the store
    #[serde(rename = "_id")]
    pub id: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Recorded messages, in order
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
    /// Owner of the session
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Last write time
    #[serde(rename = "lastUpdated", default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Creation time
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl RemoteSession {
    /// Build a local session from the remote record
    ///
    /// Messages the store should never have accepted are dropped with a
    /// warning rather than failing the whole session.
    pub fn into_session(self) -> Session {
        let mut session = Session::new();
        session.remote_id = Some(self.id.clone());
        if !self.title.is_empty() {
            session.title = self.title;
        }
        if let Some(created_at) = self.created_at {
            session.created_at = created_at;
        }
        if let Some(last_updated) = self.last_updated {
            session.last_updated = last_updated;
        }

        for record in self.messages {
            match record.into_message() {
                Ok(message) => session.messages.push(message),
                Err(e) => tracing::warn!("Skipping invalid message in session {}: {}", self.id, e),
            }
        }
        session
    }
}

/// Body of a create call
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    /// Initial title
    pub title: String,
    /// Messages to record
    pub messages: Vec<RemoteMessage>,
    /// Owner identifier
    #[serde(rename = "userId")]
    pub owner_id: String,
}

/// Body of an update call; absent fields are left untouched remotely
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateSessionRequest {
    /// New title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Replacement message list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<RemoteMessage>>,
}

/// Body of an append call: one message added after the recorded ones
#[derive(Debug, Clone, Serialize)]
pub struct AppendMessageRequest {
    pub message: RemoteMessage,
}

/// Build the message payload for `session`
///
/// Empty placeholders are left out; any other message the store would
/// reject is an error.
pub fn messages_payload(session: &Session) -> Result<Vec<RemoteMessage>> {
    session
        .messages
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| {
            let record = RemoteMessage::from(m);
            record.validate()?;
            Ok(record)
        })
        .collect()
}

//! Session module for Chatwire
//!
//! This module owns the conversation data model: sessions, messages,
//! their identifiers, and the [`SessionStore`] that mutates them. Other
//! components only ever reach session state through the store's API,
//! usually via the cloneable [`SharedSessionStore`] handle.

pub mod store;

pub use store::{SessionStore, DEFAULT_TITLE, TITLE_MAX_CHARS};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use ulid::Ulid;

use crate::error::ChatwireError;

/// Local, ephemeral session identifier
///
/// Distinct from the durable identifier a remote store assigns once the
/// session has been created there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new sortable session identifier
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Message identifier, unique within a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a new sortable message identifier
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the user
    User,
    /// Reply produced by the model
    Assistant,
    /// Instruction injected ahead of the conversation
    System,
}

impl Role {
    /// Wire representation of the role
    ///
    /// # Examples
    ///
    /// ```
    /// use chatwire::session::Role;
    ///
    /// assert_eq!(Role::Assistant.as_str(), "assistant");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ChatwireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(ChatwireError::InvalidMessage(format!(
                "unknown role: {:?}",
                other
            ))),
        }
    }
}

/// A single message in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier, unique within the owning session
    pub id: MessageId,
    /// Author of the message
    pub role: Role,
    /// Message body
    pub content: String,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a message with a fresh identifier and the current time
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use chatwire::session::{Message, Role};
    ///
    /// let msg = Message::user("Hello!");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A conversation: ordered messages plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Local identifier
    pub id: SessionId,
    /// Identifier assigned by the remote store, once created there
    pub remote_id: Option<String>,
    /// Display title
    pub title: String,
    /// Messages in insertion order
    pub messages: Vec<Message>,
    /// Message currently being filled by an assistant turn, if any
    pub streaming_target: Option<MessageId>,
    /// Last time the session was mutated
    pub last_updated: DateTime<Utc>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Creates an empty session titled [`DEFAULT_TITLE`]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            remote_id: None,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            streaming_target: None,
            last_updated: now,
            created_at: now,
        }
    }

    /// Find a message by identifier
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Whether a message with this identifier is the active streaming target
    pub fn is_streaming(&self, id: &MessageId) -> bool {
        self.streaming_target.as_ref() == Some(id)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle to the single [`SessionStore`]
///
/// The lock is only ever held for the duration of one store operation and
/// never across an `.await`, so every task sees the store between
/// suspension points exactly as a single-threaded owner would.
#[derive(Debug, Clone, Default)]
pub struct SharedSessionStore {
    inner: Arc<Mutex<SessionStore>>,
}

impl SharedSessionStore {
    /// Wrap a store in a shared handle
    pub fn new(store: SessionStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn guard(&self) -> MutexGuard<'_, SessionStore> {
        // A panic while mutating cannot leave the store half-written: every
        // operation is a single Vec/field update.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a read-only closure against the store
    pub fn read<R>(&self, f: impl FnOnce(&SessionStore) -> R) -> R {
        f(&self.guard())
    }

    /// Run a mutating closure against the store
    pub fn write<R>(&self, f: impl FnOnce(&mut SessionStore) -> R) -> R {
        f(&mut self.guard())
    }

    /// Clone a session out of the store
    pub fn snapshot(&self, id: &SessionId) -> Option<Session> {
        self.read(|store| store.session(id).cloned())
    }
}

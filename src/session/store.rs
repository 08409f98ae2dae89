//! In-memory session store
//!
//! [`SessionStore`] owns every session and message. All operations are
//! synchronous and infallible from the caller's perspective: an unknown
//! identifier makes the operation a no-op, reported through the return
//! value rather than an error.

use chrono::Utc;

use super::{Message, MessageId, Role, Session, SessionId};

/// Title given to sessions that have no user message yet
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum number of characters kept from the first user message as title
pub const TITLE_MAX_CHARS: usize = 40;

/// Derive a session title from the first user message
///
/// The content is trimmed and cut to [`TITLE_MAX_CHARS`] characters; an
/// ellipsis is appended when anything was cut.
///
/// # Examples
///
/// ```
/// use chatwire::session::store::derive_title;
///
/// assert_eq!(derive_title("  Hello there  "), "Hello there");
/// assert_eq!(derive_title(&"a".repeat(41)), format!("{}...", "a".repeat(40)));
/// ```
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

/// Ordered collection of sessions plus the active-session pointer
///
/// The store always holds at least one session, and the active pointer
/// always names one of them.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Vec<Session>,
    active: SessionId,
}

impl SessionStore {
    /// Create a store holding a single fresh session, which is active
    ///
    /// # Examples
    ///
    /// ```
    /// use chatwire::session::SessionStore;
    ///
    /// let store = SessionStore::new();
    /// assert_eq!(store.len(), 1);
    /// assert_eq!(store.active_session().title, "New Chat");
    /// ```
    pub fn new() -> Self {
        let session = Session::new();
        let active = session.id.clone();
        Self {
            sessions: vec![session],
            active,
        }
    }

    /// Build a store from previously persisted sessions
    ///
    /// Order is kept as given and the first session becomes active. An
    /// empty input yields the same state as [`SessionStore::new`].
    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        match sessions.first() {
            Some(first) => Self {
                active: first.id.clone(),
                sessions,
            },
            None => Self::new(),
        }
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All sessions, newest-created first
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Look up a session
    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    fn session_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }

    /// Identifier of the active session
    pub fn active_session_id(&self) -> &SessionId {
        &self.active
    }

    /// The active session
    pub fn active_session(&self) -> &Session {
        // The active pointer is only ever set to an existing id, and the
        // last session can't be deleted.
        self.session(&self.active)
            .unwrap_or_else(|| &self.sessions[0])
    }

    /// Insert a new empty session at the front and make it active
    pub fn create_session(&mut self) -> SessionId {
        let session = Session::new();
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.active = id.clone();
        id
    }

    /// Point the active session at `id`; no-op if unknown
    ///
    /// Returns whether the active session changed.
    pub fn select_session(&mut self, id: &SessionId) -> bool {
        if self.active == *id || self.session(id).is_none() {
            return false;
        }
        self.active = id.clone();
        true
    }

    /// Append a message, deriving the title from a first user message
    ///
    /// Returns false if the session is unknown.
    pub fn append_message(&mut self, session_id: &SessionId, message: Message) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };

        if session.messages.is_empty() && message.role == Role::User {
            session.title = derive_title(&message.content);
        }
        session.messages.push(message);
        session.last_updated = Utc::now();
        true
    }

    /// Replace the content of the session's streaming target
    ///
    /// Returns false if the session or message is unknown, or if the
    /// message is not the active streaming target.
    pub fn update_message_content(
        &mut self,
        session_id: &SessionId,
        message_id: &MessageId,
        content: impl Into<String>,
    ) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };
        if !session.is_streaming(message_id) {
            return false;
        }
        let Some(message) = session.messages.iter_mut().find(|m| &m.id == message_id) else {
            return false;
        };

        message.content = content.into();
        session.last_updated = Utc::now();
        true
    }

    /// Remove a single message; used to drop an abandoned empty placeholder
    pub fn remove_message(&mut self, session_id: &SessionId, message_id: &MessageId) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };
        let before = session.messages.len();
        session.messages.retain(|m| &m.id != message_id);
        if session.streaming_target.as_ref() == Some(message_id) {
            session.streaming_target = None;
        }
        before != session.messages.len()
    }

    /// Mark `message_id` as the session's streaming target
    ///
    /// Fails if the message is unknown or another message is already the
    /// target.
    pub fn begin_streaming(&mut self, session_id: &SessionId, message_id: &MessageId) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };
        if session.message(message_id).is_none() {
            return false;
        }
        match &session.streaming_target {
            Some(current) if current != message_id => false,
            _ => {
                session.streaming_target = Some(message_id.clone());
                true
            }
        }
    }

    /// Clear the streaming target if it is `message_id`
    pub fn finish_streaming(&mut self, session_id: &SessionId, message_id: &MessageId) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };
        if session.is_streaming(message_id) {
            session.streaming_target = None;
            true
        } else {
            false
        }
    }

    /// Remove a session
    ///
    /// Refuses to remove the only remaining session. When the active
    /// session is removed the first remaining session becomes active.
    /// Returns the removed session.
    pub fn delete_session(&mut self, id: &SessionId) -> Option<Session> {
        if self.sessions.len() <= 1 {
            return None;
        }
        let index = self.sessions.iter().position(|s| &s.id == id)?;
        let removed = self.sessions.remove(index);

        if self.active == removed.id {
            self.active = self.sessions[0].id.clone();
        }
        Some(removed)
    }

    /// Set the title directly
    pub fn rename_session(&mut self, id: &SessionId, title: impl Into<String>) -> bool {
        let Some(session) = self.session_mut(id) else {
            return false;
        };
        session.title = title.into();
        session.last_updated = Utc::now();
        true
    }

    /// Attach the identifier assigned by the remote store
    pub fn set_remote_id(&mut self, id: &SessionId, remote_id: impl Into<String>) -> bool {
        let Some(session) = self.session_mut(id) else {
            return false;
        };
        session.remote_id = Some(remote_id.into());
        true
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

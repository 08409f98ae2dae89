//! Mirroring of local sessions to the remote conversation store
//!
//! Local state is authoritative. Every durable mutation schedules a write
//! through [`PersistenceSynchronizer`]: a session without a remote
//! identifier is created, one with an identifier is updated. Failed writes
//! are logged and left for the next mutation to carry forward.

pub mod http;
pub mod types;

pub use http::HttpRemoteStore;
pub use types::{
    messages_payload, AppendMessageRequest, CreateSessionRequest, RemoteMessage, RemoteSession,
    UpdateSessionRequest,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::{is_not_found, Result};
use crate::session::{Session, SessionId, SessionStore, SharedSessionStore};

/// Remote conversation store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Record a new session and return it with its assigned identifier
    async fn create(&self, request: &CreateSessionRequest) -> Result<RemoteSession>;

    /// One recorded session
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatwireError::NotFound`] for an unknown id.
    async fn fetch(&self, remote_id: &str) -> Result<RemoteSession>;

    /// Overwrite the fields present in `request`
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatwireError::NotFound`] for an unknown id.
    async fn update(&self, remote_id: &str, request: &UpdateSessionRequest)
        -> Result<RemoteSession>;

    /// Add one message after the recorded ones
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatwireError::NotFound`] for an unknown id.
    async fn append_message(&self, remote_id: &str, message: &RemoteMessage)
        -> Result<RemoteSession>;

    /// Remove a session
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatwireError::NotFound`] for an unknown id.
    async fn delete(&self, remote_id: &str) -> Result<()>;

    /// All sessions of `owner_id`, most recently updated first
    async fn list(&self, owner_id: &str) -> Result<Vec<RemoteSession>>;
}

/// What the remote store is known to hold for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceRecord {
    /// Identifier assigned by the remote store
    pub remote_id: String,
    /// Messages included in the last successful write
    pub synced_messages: Vec<RemoteMessage>,
    /// Title sent with the last successful write
    pub synced_title: String,
}

/// Schedules and performs remote writes for sessions in a shared store
#[derive(Clone)]
pub struct PersistenceSynchronizer {
    store: SharedSessionStore,
    remote: Arc<dyn RemoteStore>,
    owner_id: String,
    records: Arc<Mutex<HashMap<SessionId, PersistenceRecord>>>,
    write_locks: Arc<Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl std::fmt::Debug for PersistenceSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSynchronizer")
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The single message to append, if `messages` only extends the last write
fn appended_message(
    record: &PersistenceRecord,
    title: &str,
    messages: &[RemoteMessage],
) -> Option<RemoteMessage> {
    if record.synced_title != title {
        return None;
    }
    match messages.split_last() {
        Some((last, earlier)) if earlier == record.synced_messages.as_slice() => Some(last.clone()),
        _ => None,
    }
}

impl PersistenceSynchronizer {
    /// Create a synchronizer writing sessions of `store` on behalf of `owner_id`
    pub fn new(
        store: SharedSessionStore,
        remote: Arc<dyn RemoteStore>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            remote,
            owner_id: owner_id.into(),
            records: Arc::new(Mutex::new(HashMap::new())),
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Owner identifier sent with creates
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Schedule a write of the session's current state
    ///
    /// Returns immediately; the write runs in the background and any
    /// failure is logged.
    pub fn sync_session(&self, id: &SessionId) -> JoinHandle<()> {
        let this = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.sync_now(&id).await {
                tracing::warn!("Failed to sync session {}: {:#}", id, e);
            }
        })
    }

    /// Write the session's current state and wait for the outcome
    ///
    /// Writes for one session are serialised: a write issued while an
    /// earlier create is in flight waits for it and then updates the record
    /// that create produced. A session deleted locally before its turn is a
    /// no-op. When the only change since the last write is one new message
    /// at the end, that message is appended instead of resending the list.
    pub async fn sync_now(&self, id: &SessionId) -> Result<()> {
        let write_lock = self.write_lock(id);
        let _guard = write_lock.lock().await;

        // Read after acquiring the lock so a preceding create's remote id
        // is visible.
        let Some(session) = self.store.snapshot(id) else {
            tracing::debug!("Session {} no longer exists; skipping sync", id);
            return Ok(());
        };
        let messages = messages_payload(&session)?;

        let remote_id = match &session.remote_id {
            None => {
                let request = CreateSessionRequest {
                    title: session.title.clone(),
                    messages: messages.clone(),
                    owner_id: self.owner_id.clone(),
                };
                let created = self.remote.create(&request).await?;
                tracing::info!("Created remote session {} for {}", created.id, id);

                let attached = self.store.write(|s| s.set_remote_id(id, created.id.clone()));
                if !attached {
                    // Deleted locally while the create was in flight.
                    tracing::debug!("Session {} vanished during create; removing remote copy", id);
                    self.remote.delete(&created.id).await?;
                    return Ok(());
                }
                created.id
            }
            Some(remote_id) => {
                let previous = self.record(id).filter(|r| &r.remote_id == remote_id);
                match previous.and_then(|r| appended_message(&r, &session.title, &messages)) {
                    Some(message) => {
                        self.remote.append_message(remote_id, &message).await?;
                        tracing::debug!("Appended message to remote session {}", remote_id);
                    }
                    None => {
                        let request = UpdateSessionRequest {
                            title: Some(session.title.clone()),
                            messages: Some(messages.clone()),
                        };
                        self.remote.update(remote_id, &request).await?;
                        tracing::debug!("Updated remote session {}", remote_id);
                    }
                }
                remote_id.clone()
            }
        };

        lock(&self.records).insert(
            id.clone(),
            PersistenceRecord {
                remote_id,
                synced_messages: messages,
                synced_title: session.title,
            },
        );
        Ok(())
    }

    /// Remove the remote copy of a locally deleted session
    ///
    /// Sessions never created remotely need nothing; returns `None` then.
    pub fn delete_remote(&self, session: &Session) -> Option<JoinHandle<()>> {
        self.forget(&session.id);
        let remote_id = session.remote_id.clone()?;
        let remote = Arc::clone(&self.remote);

        Some(tokio::spawn(async move {
            match remote.delete(&remote_id).await {
                Ok(()) => tracing::info!("Deleted remote session {}", remote_id),
                Err(e) if is_not_found(&e) => {
                    tracing::debug!("Remote session {} already gone", remote_id)
                }
                Err(e) => tracing::warn!("Failed to delete remote session {}: {:#}", remote_id, e),
            }
        }))
    }

    /// Last successful write for a session
    pub fn record(&self, id: &SessionId) -> Option<PersistenceRecord> {
        lock(&self.records).get(id).cloned()
    }

    /// Whether the remote copy matches the local session
    ///
    /// False for sessions never created remotely, and for sessions with
    /// messages or a title newer than the last successful write.
    pub fn is_synced(&self, id: &SessionId) -> bool {
        let Some(record) = self.record(id) else {
            return false;
        };
        self.store.read(|store| {
            store.session(id).is_some_and(|session| {
                let persistable = session
                    .messages
                    .iter()
                    .filter(|m| !m.content.trim().is_empty())
                    .count();
                session.remote_id.as_deref() == Some(record.remote_id.as_str())
                    && persistable == record.synced_messages.len()
                    && session.title == record.synced_title
            })
        })
    }

    /// Replace the local sessions with the owner's remote sessions
    ///
    /// Keeps the current store when the owner has none. Returns the number
    /// of sessions loaded.
    pub async fn load_remote_sessions(&self) -> Result<usize> {
        let remote_sessions = self.remote.list(&self.owner_id).await?;
        if remote_sessions.is_empty() {
            return Ok(0);
        }

        let sessions: Vec<Session> = remote_sessions
            .into_iter()
            .map(RemoteSession::into_session)
            .collect();

        {
            let mut records = lock(&self.records);
            records.clear();
            for session in &sessions {
                if let Some(remote_id) = &session.remote_id {
                    records.insert(
                        session.id.clone(),
                        PersistenceRecord {
                            remote_id: remote_id.clone(),
                            synced_messages: session
                                .messages
                                .iter()
                                .map(RemoteMessage::from)
                                .collect(),
                            synced_title: session.title.clone(),
                        },
                    );
                }
            }
        }

        let count = sessions.len();
        self.store
            .write(|store| *store = SessionStore::from_sessions(sessions));
        tracing::info!("Loaded {} sessions from remote store", count);
        Ok(count)
    }

    fn write_lock(&self, id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            lock(&self.write_locks)
                .entry(id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn forget(&self, id: &SessionId) {
        lock(&self.records).remove(id);
        lock(&self.write_locks).remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatwireError;
    use crate::session::Message;
    use crate::test_utils::InMemoryRemoteStore;
    use std::time::Duration;

    fn setup() -> (SharedSessionStore, Arc<InMemoryRemoteStore>, PersistenceSynchronizer) {
        let store = SharedSessionStore::default();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let sync = PersistenceSynchronizer::new(store.clone(), remote.clone(), "owner-1");
        (store, remote, sync)
    }

    #[tokio::test]
    async fn test_first_write_creates_and_attaches_remote_id() {
        let (store, remote, sync) = setup();
        let id = store.read(|s| s.active_session_id().clone());
        store.write(|s| s.append_message(&id, Message::user("hello")));

        sync.sync_now(&id).await.unwrap();

        let remote_id = store.snapshot(&id).unwrap().remote_id.unwrap();
        assert_eq!(remote.create_count(), 1);
        assert_eq!(remote.get(&remote_id).unwrap().owner_id.as_deref(), Some("owner-1"));
        assert!(sync.is_synced(&id));
    }

    #[tokio::test]
    async fn test_rename_after_create_is_update() {
        let (store, remote, sync) = setup();
        let id = store.read(|s| s.active_session_id().clone());
        store.write(|s| s.append_message(&id, Message::user("hello")));
        sync.sync_now(&id).await.unwrap();

        store.write(|s| s.rename_session(&id, "Renamed"));
        assert!(!sync.is_synced(&id));
        sync.sync_now(&id).await.unwrap();

        let remote_id = store.snapshot(&id).unwrap().remote_id.unwrap();
        assert_eq!(remote.create_count(), 1);
        assert_eq!(remote.update_count(), 1);
        assert_eq!(remote.get(&remote_id).unwrap().title, "Renamed");
        assert!(sync.is_synced(&id));
    }

    #[tokio::test]
    async fn test_new_trailing_message_is_appended() {
        let (store, remote, sync) = setup();
        let id = store.read(|s| s.active_session_id().clone());
        store.write(|s| s.append_message(&id, Message::user("hello")));
        sync.sync_now(&id).await.unwrap();

        store.write(|s| s.append_message(&id, Message::assistant("hi there")));
        sync.sync_now(&id).await.unwrap();

        let remote_id = store.snapshot(&id).unwrap().remote_id.unwrap();
        assert_eq!(remote.append_count(), 1);
        assert_eq!(remote.update_count(), 0);
        let recorded = remote.fetch(&remote_id).await.unwrap();
        let contents: Vec<&str> = recorded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hi there"]);
        assert!(sync.is_synced(&id));
    }

    #[tokio::test]
    async fn test_changed_earlier_message_resends_list() {
        let (store, remote, sync) = setup();
        let id = store.read(|s| s.active_session_id().clone());
        let reply = Message::assistant("Hel");
        let reply_id = reply.id.clone();
        store.write(|s| {
            s.append_message(&id, Message::user("hello"));
            s.append_message(&id, reply);
        });
        sync.sync_now(&id).await.unwrap();

        store.write(|s| {
            s.begin_streaming(&id, &reply_id);
            s.update_message_content(&id, &reply_id, "Hello there");
            s.finish_streaming(&id, &reply_id);
            s.append_message(&id, Message::user("again"));
        });
        sync.sync_now(&id).await.unwrap();

        let remote_id = store.snapshot(&id).unwrap().remote_id.unwrap();
        assert_eq!(remote.append_count(), 0);
        assert_eq!(remote.update_count(), 1);
        assert_eq!(remote.get(&remote_id).unwrap().messages[1].content, "Hello there");
    }

    #[tokio::test]
    async fn test_fetch_unknown_record_is_not_found() {
        let (_store, remote, _sync) = setup();
        let err = remote.fetch("nope").await.unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn test_concurrent_writes_create_once() {
        let (store, remote, sync) = setup();
        remote.set_latency(Duration::from_millis(20));
        let id = store.read(|s| s.active_session_id().clone());
        store.write(|s| s.append_message(&id, Message::user("hello")));

        let first = sync.sync_session(&id);
        store.write(|s| s.rename_session(&id, "Second write"));
        let second = sync.sync_session(&id);
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(remote.create_count(), 1);
        assert_eq!(remote.update_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_keeps_create_semantics() {
        let (store, remote, sync) = setup();
        let id = store.read(|s| s.active_session_id().clone());
        store.write(|s| s.append_message(&id, Message::user("hello")));

        remote.fail_next_writes(1);
        assert!(sync.sync_now(&id).await.is_err());
        assert!(store.snapshot(&id).unwrap().remote_id.is_none());
        assert!(!sync.is_synced(&id));

        sync.sync_now(&id).await.unwrap();
        assert_eq!(remote.create_count(), 1);
        assert!(store.snapshot(&id).unwrap().remote_id.is_some());
    }

    #[tokio::test]
    async fn test_sync_of_deleted_session_is_noop() {
        let (store, remote, sync) = setup();
        let doomed = store.read(|s| s.active_session_id().clone());
        store.write(|s| s.create_session());
        store.write(|s| s.delete_session(&doomed));

        sync.sync_now(&doomed).await.unwrap();
        assert_eq!(remote.create_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_without_remote_id_is_local_only() {
        let (store, remote, sync) = setup();
        let session = store.read(|s| s.active_session().clone());
        assert!(sync.delete_remote(&session).is_none());
        assert_eq!(remote.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_of_missing_remote_record_is_logged() {
        let (_store, remote, sync) = setup();
        let mut session = Session::new();
        session.remote_id = Some("missing".into());

        sync.delete_remote(&session).unwrap().await.unwrap();
        assert_eq!(remote.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_whitespace_reply_is_left_out() {
        let (store, remote, sync) = setup();
        let id = store.read(|s| s.active_session_id().clone());
        store.write(|s| s.append_message(&id, Message::user("hello")));
        store.write(|s| {
            s.append_message(&id, Message::assistant("   \n"));
        });

        // Whitespace-only content is treated like an empty placeholder.
        sync.sync_now(&id).await.unwrap();
        let remote_id = store.snapshot(&id).unwrap().remote_id.unwrap();
        assert_eq!(remote.get(&remote_id).unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_load_remote_sessions_hydrates_store() {
        let (store, remote, sync) = setup();
        remote.seed("owner-1", "Newest", &[("user", "b")]);
        remote.seed("owner-1", "Oldest", &[("user", "a")]);
        remote.seed("someone-else", "Hidden", &[]);

        let loaded = sync.load_remote_sessions().await.unwrap();
        assert_eq!(loaded, 2);

        let titles: Vec<String> =
            store.read(|s| s.sessions().iter().map(|x| x.title.clone()).collect());
        assert_eq!(titles, vec!["Newest", "Oldest"]);
        let active = store.read(|s| s.active_session().clone());
        assert_eq!(active.title, "Newest");
        assert!(sync.is_synced(&active.id));
    }

    #[tokio::test]
    async fn test_load_remote_sessions_failure_keeps_store() {
        let (store, remote, sync) = setup();
        let before = store.read(|s| s.active_session_id().clone());
        remote.fail_lists(true);

        let err = sync.load_remote_sessions().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatwireError>(),
            Some(ChatwireError::Persistence(_))
        ));
        assert_eq!(store.read(|s| s.active_session_id().clone()), before);
    }
}

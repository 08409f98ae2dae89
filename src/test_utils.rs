//! Test utilities for Chatwire
//!
//! In-process stand-ins for the model service and the remote store, so the
//! engine and synchronizer can be exercised without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;

use crate::error::{ChatwireError, Result};
use crate::persistence::{
    CreateSessionRequest, RemoteMessage, RemoteSession, RemoteStore, UpdateSessionRequest,
};
use crate::service::{ByteStream, ChatMessage, ModelService};

/// Build one `data:` frame
pub fn frame(json: &str) -> String {
    format!("data: {}\n\n", json)
}

/// Frame carrying a `chunk` envelope
pub fn chunk_frame(content: &str) -> String {
    frame(&serde_json::json!({"type": "chunk", "content": content}).to_string())
}

/// How the fake service answers one `open_stream` call
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Body fragments delivered as-is, then end of input
    Raw(Vec<String>),
    /// `start`, one frame per chunk spaced by the delay, then `done`
    Paced(Vec<String>, Duration),
    /// `start`, then nothing ever again
    Stalled,
    /// The request itself fails
    OpenFails,
}

impl ScriptedReply {
    /// A well-formed reply of `chunks` delivered in a single fragment each
    pub fn chunks(chunks: &[&str]) -> Self {
        let mut parts = vec![frame(r#"{"type":"start"}"#)];
        parts.extend(chunks.iter().map(|c| chunk_frame(c)));
        parts.push(frame(r#"{"type":"done"}"#));
        Self::Raw(parts)
    }
}

fn bytes_of(parts: Vec<String>) -> Vec<Result<Bytes>> {
    parts.into_iter().map(|p| Ok(Bytes::from(p))).collect()
}

/// Model service that replays scripted replies in order
pub struct ScriptedModelService {
    replies: Mutex<VecDeque<ScriptedReply>>,
    completion: Mutex<std::result::Result<String, String>>,
    stream_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl ScriptedModelService {
    /// Serve `replies` to successive stream requests
    ///
    /// Once exhausted, stream requests fail. The synchronous call fails
    /// unless [`Self::with_completion`] is used.
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            completion: Mutex::new(Err("no completion scripted".to_string())),
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }

    /// Answer for the synchronous endpoint
    pub fn with_completion(self, completion: std::result::Result<String, String>) -> Self {
        *self.completion.lock().unwrap() = completion;
        self
    }

    /// Number of stream requests made
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Number of synchronous requests made
    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelService for ScriptedModelService {
    async fn open_stream(&self, _history: &[ChatMessage]) -> Result<ByteStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().unwrap().pop_front();

        match reply {
            Some(ScriptedReply::Raw(parts)) => Ok(Box::pin(futures::stream::iter(bytes_of(parts)))),
            Some(ScriptedReply::Paced(chunks, gap)) => {
                let mut parts = vec![frame(r#"{"type":"start"}"#)];
                parts.extend(chunks.iter().map(|c| chunk_frame(c)));
                parts.push(frame(r#"{"type":"done"}"#));
                let body = futures::stream::iter(parts).then(move |part| async move {
                    tokio::time::sleep(gap).await;
                    Ok::<_, anyhow::Error>(Bytes::from(part))
                });
                Ok(Box::pin(body))
            }
            Some(ScriptedReply::Stalled) => {
                let start = futures::stream::iter(bytes_of(vec![frame(r#"{"type":"start"}"#)]));
                Ok(Box::pin(start.chain(futures::stream::pending())))
            }
            Some(ScriptedReply::OpenFails) | None => {
                Err(ChatwireError::Transport("scripted failure".to_string()).into())
            }
        }
    }

    async fn complete(&self, _history: &[ChatMessage]) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.completion
            .lock()
            .unwrap()
            .clone()
            .map_err(|e| ChatwireError::FallbackFailed(e).into())
    }
}

#[derive(Default)]
struct RemoteState {
    sessions: Vec<RemoteSession>,
    creates: usize,
    updates: usize,
    appends: usize,
    deletes: usize,
    failing_writes: usize,
    failing_lists: bool,
    latency: Option<Duration>,
    next_id: usize,
}

/// Remote store kept in memory
#[derive(Default)]
pub struct InMemoryRemoteStore {
    state: Mutex<RemoteState>,
}

impl InMemoryRemoteStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every write by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    /// Fail the next `count` writes
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().unwrap().failing_writes = count;
    }

    /// Make every list call fail
    pub fn fail_lists(&self, fail: bool) {
        self.state.lock().unwrap().failing_lists = fail;
    }

    /// Insert a record directly; earlier seeds count as more recent
    pub fn seed(&self, owner: &str, title: &str, messages: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("remote-{}", state.next_id);
        let age = chrono::Duration::minutes(state.sessions.len() as i64);
        state.sessions.push(RemoteSession {
            id: id.clone(),
            title: title.to_string(),
            messages: messages
                .iter()
                .map(|(role, content)| RemoteMessage {
                    id: None,
                    role: role.to_string(),
                    content: content.to_string(),
                    timestamp: None,
                })
                .collect(),
            owner_id: Some(owner.to_string()),
            last_updated: Some(Utc::now() - age),
            created_at: Some(Utc::now() - age),
        });
        id
    }

    /// Look up a record
    pub fn get(&self, remote_id: &str) -> Option<RemoteSession> {
        let state = self.state.lock().unwrap();
        state.sessions.iter().find(|s| s.id == remote_id).cloned()
    }

    /// Number of successful creates
    pub fn create_count(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    /// Number of successful updates
    pub fn update_count(&self) -> usize {
        self.state.lock().unwrap().updates
    }

    /// Number of successful single-message appends
    pub fn append_count(&self) -> usize {
        self.state.lock().unwrap().appends
    }

    /// Number of delete calls, including not-found ones
    pub fn delete_count(&self) -> usize {
        self.state.lock().unwrap().deletes
    }

    async fn before_write(&self) -> Result<()> {
        let latency = self.state.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(ChatwireError::Persistence("injected failure".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn create(&self, request: &CreateSessionRequest) -> Result<RemoteSession> {
        self.before_write().await?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.creates += 1;
        let record = RemoteSession {
            id: format!("remote-{}", state.next_id),
            title: request.title.clone(),
            messages: request.messages.clone(),
            owner_id: Some(request.owner_id.clone()),
            last_updated: Some(Utc::now()),
            created_at: Some(Utc::now()),
        };
        state.sessions.push(record.clone());
        Ok(record)
    }

    async fn fetch(&self, remote_id: &str) -> Result<RemoteSession> {
        self.get(remote_id)
            .ok_or_else(|| ChatwireError::NotFound(remote_id.to_string()).into())
    }

    async fn append_message(
        &self,
        remote_id: &str,
        message: &RemoteMessage,
    ) -> Result<RemoteSession> {
        self.before_write().await?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .sessions
            .iter_mut()
            .find(|s| s.id == remote_id)
            .ok_or_else(|| ChatwireError::NotFound(remote_id.to_string()))?;
        record.messages.push(message.clone());
        record.last_updated = Some(Utc::now());
        let updated = record.clone();
        state.appends += 1;
        Ok(updated)
    }

    async fn update(
        &self,
        remote_id: &str,
        request: &UpdateSessionRequest,
    ) -> Result<RemoteSession> {
        self.before_write().await?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .sessions
            .iter_mut()
            .find(|s| s.id == remote_id)
            .ok_or_else(|| ChatwireError::NotFound(remote_id.to_string()))?;
        if let Some(title) = &request.title {
            record.title = title.clone();
        }
        if let Some(messages) = &request.messages {
            record.messages = messages.clone();
        }
        record.last_updated = Some(Utc::now());
        let updated = record.clone();
        state.updates += 1;
        Ok(updated)
    }

    async fn delete(&self, remote_id: &str) -> Result<()> {
        self.before_write().await?;
        let mut state = self.state.lock().unwrap();
        state.deletes += 1;
        let before = state.sessions.len();
        state.sessions.retain(|s| s.id != remote_id);
        if state.sessions.len() == before {
            return Err(ChatwireError::NotFound(remote_id.to_string()).into());
        }
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<RemoteSession>> {
        let state = self.state.lock().unwrap();
        if state.failing_lists {
            return Err(ChatwireError::Persistence("injected failure".to_string()).into());
        }
        let mut sessions: Vec<RemoteSession> = state
            .sessions
            .iter()
            .filter(|s| s.owner_id.as_deref() == Some(owner_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(sessions)
    }
}

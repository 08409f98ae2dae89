//! Streaming session engine
//!
//! [`ChatEngine`] is the single entry point for user actions. It owns the
//! shared session store and runs every assistant turn as its own task:
//!
//! 1. the user message and an empty assistant placeholder are appended
//!    before anything is awaited, so turns keep call order;
//! 2. the reply is streamed into the placeholder through the throttle;
//! 3. on any stream failure the placeholder is cleared and the synchronous
//!    endpoint is called, its reply revealed a few characters per tick;
//! 4. if that fails too the placeholder shows [`fallback::APOLOGY`].
//!
//! Switching away from a session, deleting it, or shutting the engine down
//! cancels its turn along with any pending throttle or reveal timer.

pub mod fallback;

pub use fallback::{FallbackController, TurnState, APOLOGY};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{ChatwireError, Result};
use crate::persistence::PersistenceSynchronizer;
use crate::service::{ChatMessage, ModelService};
use crate::session::{Message, MessageId, SessionId, SharedSessionStore};
use crate::stream::{Envelope, EnvelopeReader, StreamCursor, UpdateScheduler};

const EVENT_CAPACITY: usize = 1024;

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream delivered the whole reply
    Streamed,
    /// The stream failed and the synchronous reply was revealed instead
    Recovered,
    /// Both paths failed; the apology is shown
    Failed,
    /// The turn was abandoned before finishing
    Cancelled,
}

impl TurnOutcome {
    /// Terminal state the turn reached
    pub fn state(self) -> TurnState {
        match self {
            Self::Streamed | Self::Recovered => TurnState::Complete,
            Self::Failed => TurnState::Failed,
            Self::Cancelled => TurnState::Cancelled,
        }
    }
}

/// Notifications for renderers
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A message's content changed in the store
    ContentUpdated {
        /// Owning session
        session: SessionId,
        /// Updated message
        message: MessageId,
        /// Full content after the update
        content: String,
    },
    /// A turn moved to a new state
    TurnStateChanged {
        /// Owning session
        session: SessionId,
        /// Assistant message of the turn
        message: MessageId,
        /// New state
        state: TurnState,
    },
    /// A turn reached a terminal state
    TurnFinished {
        /// Owning session
        session: SessionId,
        /// Assistant message of the turn
        message: MessageId,
        /// How it ended
        outcome: TurnOutcome,
    },
}

/// A running assistant turn
#[derive(Debug)]
pub struct TurnHandle {
    /// Session the turn belongs to
    pub session_id: SessionId,
    /// The assistant message being filled
    pub message_id: MessageId,
    handle: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    /// Wait for the turn to end
    pub async fn wait(self) -> TurnOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Turn task for {} ended abnormally: {}", self.message_id, e);
                TurnOutcome::Cancelled
            }
        }
    }
}

struct ActiveTurn {
    message_id: MessageId,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The streaming session engine
pub struct ChatEngine {
    runner: TurnRunner,
    turns: Arc<Mutex<HashMap<SessionId, ActiveTurn>>>,
    shutdown: CancellationToken,
}

impl ChatEngine {
    /// Create an engine over `store`
    ///
    /// Without a synchronizer, sessions are kept in memory only.
    pub fn new(
        store: SharedSessionStore,
        service: Arc<dyn ModelService>,
        persistence: Option<PersistenceSynchronizer>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            runner: TurnRunner {
                store,
                service,
                persistence,
                config,
                events,
            },
            turns: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Handle to the session store
    pub fn store(&self) -> &SharedSessionStore {
        &self.runner.store
    }

    /// Remote synchronizer, if persistence is enabled
    pub fn persistence(&self) -> Option<&PersistenceSynchronizer> {
        self.runner.persistence.as_ref()
    }

    /// Receive engine events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.runner.events.subscribe()
    }

    /// Identifier of the active session
    pub fn active_session_id(&self) -> SessionId {
        self.runner
            .store
            .read(|store| store.active_session_id().clone())
    }

    /// Whether `session` has a turn that has not reached a terminal state
    pub fn is_turn_active(&self, session: &SessionId) -> bool {
        lock(&self.turns).contains_key(session)
    }

    /// Create a new empty session and make it active
    pub fn create_session(&self) -> SessionId {
        let id = self.runner.store.write(|store| store.create_session());
        self.cancel_turns_except(&id);
        tracing::debug!("Created session {}", id);
        self.runner.sync(&id);
        id
    }

    /// Make `id` the active session
    ///
    /// Unknown ids are ignored. Returns whether the active session changed.
    pub fn select_session(&self, id: &SessionId) -> bool {
        let changed = self.runner.store.write(|store| store.select_session(id));
        if changed {
            self.cancel_turns_except(id);
        }
        changed
    }

    /// Delete a session and its remote copy
    ///
    /// The only remaining session is never deleted. Returns whether the
    /// session was removed.
    pub fn delete_session(&self, id: &SessionId) -> bool {
        let Some(removed) = self.runner.store.write(|store| store.delete_session(id)) else {
            tracing::debug!("Refusing to delete session {}", id);
            return false;
        };
        if let Some(turn) = lock(&self.turns).get(id) {
            turn.cancel.cancel();
        }
        let active = self.active_session_id();
        self.cancel_turns_except(&active);

        if let Some(persistence) = &self.runner.persistence {
            persistence.delete_remote(&removed);
        }
        tracing::debug!("Deleted session {}", id);
        true
    }

    /// Set a session's title
    pub fn rename_session(&self, id: &SessionId, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        let renamed = self.runner.store.write(|store| store.rename_session(id, title));
        if renamed {
            self.runner.sync(id);
        }
        renamed
    }

    /// Send a user message in the active session and start the reply
    ///
    /// Returns `None` without touching the store if the input is blank, the
    /// engine is shut down, or the session already has a turn in flight.
    pub fn send_message(&self, content: &str) -> Option<TurnHandle> {
        let content = content.trim();
        if content.is_empty() || self.shutdown.is_cancelled() {
            return None;
        }

        let session_id = self.active_session_id();
        let mut turns = lock(&self.turns);
        if turns.contains_key(&session_id) {
            tracing::debug!("Session {} already has a turn in flight", session_id);
            return None;
        }

        let user = Message::user(content);
        let placeholder = Message::assistant("");
        let message_id = placeholder.id.clone();

        let history = self.runner.store.write(|store| {
            store.append_message(&session_id, user);
            store.append_message(&session_id, placeholder);
            store.begin_streaming(&session_id, &message_id);
            store
                .session(&session_id)
                .map(|session| {
                    session
                        .messages
                        .iter()
                        .filter(|m| m.id != message_id)
                        .map(ChatMessage::from)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        });
        self.runner.sync(&session_id);

        let cancel = self.shutdown.child_token();
        turns.insert(
            session_id.clone(),
            ActiveTurn {
                message_id: message_id.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(turns);

        let runner = self.runner.clone();
        let turns = Arc::clone(&self.turns);
        let task_session = session_id.clone();
        let task_message = message_id.clone();
        let handle = tokio::spawn(async move {
            runner
                .run(task_session, task_message, history, cancel, turns)
                .await
        });

        Some(TurnHandle {
            session_id,
            message_id,
            handle,
        })
    }

    /// Replace local sessions with the owner's remote sessions
    ///
    /// Cancels every turn first. Returns how many sessions were loaded; 0
    /// when persistence is disabled or the owner has none.
    pub async fn load_remote_sessions(&self) -> Result<usize> {
        let Some(persistence) = &self.runner.persistence else {
            return Ok(0);
        };
        for turn in lock(&self.turns).values() {
            turn.cancel.cancel();
        }
        persistence.load_remote_sessions().await
    }

    /// Cancel every turn and refuse new ones
    pub fn shutdown(&self) {
        tracing::debug!("Shutting down engine");
        self.shutdown.cancel();
    }

    fn cancel_turns_except(&self, keep: &SessionId) {
        for (session, turn) in lock(&self.turns).iter() {
            if session != keep {
                tracing::debug!("Cancelling turn {} in session {}", turn.message_id, session);
                turn.cancel.cancel();
            }
        }
    }
}

impl Drop for ChatEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Everything a turn task needs, cloned into the task
#[derive(Clone)]
struct TurnRunner {
    store: SharedSessionStore,
    service: Arc<dyn ModelService>,
    persistence: Option<PersistenceSynchronizer>,
    config: EngineConfig,
    events: broadcast::Sender<EngineEvent>,
}

impl TurnRunner {
    async fn run(
        self,
        session: SessionId,
        message: MessageId,
        history: Vec<ChatMessage>,
        cancel: CancellationToken,
        turns: Arc<Mutex<HashMap<SessionId, ActiveTurn>>>,
    ) -> TurnOutcome {
        let mut controller = FallbackController::new();
        self.emit(EngineEvent::TurnStateChanged {
            session: session.clone(),
            message: message.clone(),
            state: TurnState::Streaming,
        });

        let outcome = self
            .drive(&session, &message, &history, &cancel, &mut controller)
            .await;

        if let Err(e) = controller.transition(outcome.state()) {
            tracing::error!("Turn {} ended inconsistently: {:#}", message, e);
        }
        self.emit(EngineEvent::TurnStateChanged {
            session: session.clone(),
            message: message.clone(),
            state: outcome.state(),
        });

        self.store.write(|store| {
            store.finish_streaming(&session, &message);
            if outcome == TurnOutcome::Cancelled {
                let empty = store
                    .session(&session)
                    .and_then(|s| s.message(&message))
                    .is_some_and(|m| m.content.is_empty());
                if empty {
                    store.remove_message(&session, &message);
                }
            }
        });

        {
            let mut turns = lock(&turns);
            if turns
                .get(&session)
                .is_some_and(|turn| turn.message_id == message)
            {
                turns.remove(&session);
            }
        }

        tracing::info!("Turn {} in session {} finished: {:?}", message, session, outcome);
        self.emit(EngineEvent::TurnFinished {
            session: session.clone(),
            message,
            outcome,
        });

        if outcome != TurnOutcome::Cancelled {
            if let Some(sync) = self.sync(&session) {
                let _ = sync.await;
            }
        }
        outcome
    }

    async fn drive(
        &self,
        session: &SessionId,
        message: &MessageId,
        history: &[ChatMessage],
        cancel: &CancellationToken,
        controller: &mut FallbackController,
    ) -> TurnOutcome {
        let streamed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TurnOutcome::Cancelled,
            result = self.stream_reply(session, message, history) => result,
        };

        let error = match streamed {
            Ok(()) => return TurnOutcome::Streamed,
            Err(e) => e,
        };

        let transport_like = error
            .downcast_ref::<ChatwireError>()
            .is_some_and(ChatwireError::triggers_fallback);
        if transport_like {
            tracing::warn!("Streaming failed, falling back: {:#}", error);
        } else {
            tracing::error!("Unexpected streaming failure, falling back: {:#}", error);
        }

        if let Err(e) = controller.transition(TurnState::FallbackSync) {
            tracing::error!("{:#}", e);
            return TurnOutcome::Failed;
        }
        self.emit(EngineEvent::TurnStateChanged {
            session: session.clone(),
            message: message.clone(),
            state: TurnState::FallbackSync,
        });
        self.apply(session, message, "");

        let revealed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TurnOutcome::Cancelled,
            result = self.fallback_reply(session, message, history) => result,
        };

        match revealed {
            Ok(()) => TurnOutcome::Recovered,
            Err(e) => {
                tracing::error!("Fallback failed: {:#}", e);
                self.apply(session, message, APOLOGY);
                TurnOutcome::Failed
            }
        }
    }

    async fn stream_reply(
        &self,
        session: &SessionId,
        message: &MessageId,
        history: &[ChatMessage],
    ) -> Result<()> {
        let body = self.service.open_stream(history).await?;
        let mut reader =
            EnvelopeReader::new(body).with_idle_timeout(self.config.stream_idle_timeout());
        let scheduler = UpdateScheduler::new(self.config.min_update_interval());
        let mut cursor = StreamCursor::new(session.clone(), message.clone());

        while let Some(envelope) = reader.next().await? {
            match envelope {
                Envelope::Start => tracing::debug!("Stream started for {}", message),
                Envelope::Chunk { content } => {
                    cursor.push(&content);
                    scheduler
                        .offer(&mut cursor, |text| {
                            self.apply(session, message, text);
                        })
                        .await;
                }
                Envelope::Done => {
                    scheduler.flush(&mut cursor, |text| {
                        self.apply(session, message, text);
                    });
                    return Ok(());
                }
                Envelope::Error { error } => return Err(ChatwireError::Protocol(error).into()),
            }
        }
        Err(ChatwireError::UnexpectedEndOfStream.into())
    }

    async fn fallback_reply(
        &self,
        session: &SessionId,
        message: &MessageId,
        history: &[ChatMessage],
    ) -> Result<()> {
        let reply = self.service.complete(history).await?;
        let frames = fallback::reveal_frames(&reply, self.config.reveal_chunk_chars);
        let tick = self.config.reveal_tick();

        // One frame per tick, each `reveal_chunk_chars` longer than the last.
        // No prefix is written twice: "Hello world" shows "Hello",
        // "Hello worl", "Hello world".
        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        for frame in frames {
            ticker.tick().await;
            self.apply(session, message, &frame);
        }
        Ok(())
    }

    /// Write `content` into the streaming target and announce it
    fn apply(&self, session: &SessionId, message: &MessageId, content: &str) -> bool {
        let applied = self
            .store
            .write(|store| store.update_message_content(session, message, content));
        if applied {
            self.emit(EngineEvent::ContentUpdated {
                session: session.clone(),
                message: message.clone(),
                content: content.to_string(),
            });
        }
        applied
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn sync(&self, session: &SessionId) -> Option<JoinHandle<()>> {
        self.persistence
            .as_ref()
            .map(|persistence| persistence.sync_session(session))
    }
}

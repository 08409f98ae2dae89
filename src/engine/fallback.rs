//! Turn state machine and the simulated reveal used after a failed stream

use std::fmt;

use crate::error::{ChatwireError, Result};

/// Shown in place of the reply when both the stream and the fallback fail
pub const APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

/// Lifecycle of one assistant turn
///
/// ```text
/// Streaming ──done──────────────────────────▶ Complete
///     │                                          ▲
///     └─failure─▶ FallbackSync ──reply──────────┘
///                      └──────────failure──▶ Failed
/// ```
///
/// Any non-terminal state may also move to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// Reading the streamed reply
    Streaming,
    /// Waiting on the synchronous request, then revealing it
    FallbackSync,
    /// The reply is fully shown
    Complete,
    /// Both paths failed; the apology is shown
    Failed,
    /// Abandoned by a session switch, session deletion, or shutdown
    Cancelled,
}

impl TurnState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is reachable from `self` in one step
    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Streaming, Complete)
                | (Streaming, FallbackSync)
                | (Streaming, Cancelled)
                | (FallbackSync, Complete)
                | (FallbackSync, Failed)
                | (FallbackSync, Cancelled)
        )
    }

    /// Lowercase name used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::FallbackSync => "fallback_sync",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the state of one turn and rejects illegal moves
#[derive(Debug, Clone)]
pub struct FallbackController {
    state: TurnState,
    history: Vec<TurnState>,
}

impl FallbackController {
    /// Start in [`TurnState::Streaming`]
    pub fn new() -> Self {
        Self {
            state: TurnState::Streaming,
            history: vec![TurnState::Streaming],
        }
    }

    /// Current state
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[TurnState] {
        &self.history
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns [`ChatwireError::InvalidTransition`] and leaves the state
    /// unchanged if `next` is not reachable from the current state.
    pub fn transition(&mut self, next: TurnState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ChatwireError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            }
            .into());
        }
        tracing::debug!("Turn state {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

impl Default for FallbackController {
    fn default() -> Self {
        Self::new()
    }
}

/// Successive prefixes of `text`, growing by `chunk_chars` characters
///
/// The last frame is always the full text. Slices fall on character
/// boundaries, never inside a multi-byte character.
///
/// # Examples
///
/// ```
/// use chatwire::engine::fallback::reveal_frames;
///
/// assert_eq!(
///     reveal_frames("Hello world", 5),
///     vec!["Hello", "Hello worl", "Hello world"]
/// );
/// ```
pub fn reveal_frames(text: &str, chunk_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let mut frames = Vec::new();
    let mut shown = 0;

    for (count, (offset, ch)) in text.char_indices().enumerate() {
        let end = offset + ch.len_utf8();
        if (count + 1) % chunk_chars == 0 {
            frames.push(text[..end].to_string());
            shown = end;
        }
    }
    if shown < text.len() {
        frames.push(text.to_string());
    }
    frames
}

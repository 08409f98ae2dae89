//! Error types for Chatwire
//!
//! This module defines all error types used throughout the engine,
//! using `thiserror` for ergonomic error handling.
//!
//! Only two families are allowed to reach the user as distinct outcomes:
//! a failed fallback call (the apology message) and persistence failures
//! (a session that silently stays unsynced). Everything else is absorbed
//! by the turn state machine.

use thiserror::Error;

/// Main error type for Chatwire operations
#[derive(Error, Debug)]
pub enum ChatwireError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Streaming request failed, returned a non-success status, or had no body
    #[error("Transport error: {0}")]
    Transport(String),

    /// The stream carried an explicit error envelope
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The stream closed before a terminal envelope was observed
    #[error("Stream ended without a terminal event")]
    UnexpectedEndOfStream,

    /// The synchronous fallback call failed
    #[error("Fallback request failed: {0}")]
    FallbackFailed(String),

    /// A turn was asked to move to a state it cannot reach
    #[error("Invalid turn transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Remote conversation store errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The remote store has no record with the given identifier
    #[error("Not found: {0}")]
    NotFound(String),

    /// A message the remote store would reject
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ChatwireError {
    /// Whether this error should hand the turn over to the fallback path.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatwire::error::ChatwireError;
    ///
    /// assert!(ChatwireError::UnexpectedEndOfStream.triggers_fallback());
    /// assert!(!ChatwireError::Persistence("down".into()).triggers_fallback());
    /// ```
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Protocol(_) | Self::UnexpectedEndOfStream | Self::Http(_)
        )
    }
}

/// Result type alias for Chatwire operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Returns true when `err` wraps [`ChatwireError::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ChatwireError>(),
        Some(ChatwireError::NotFound(_))
    )
}

//! Chatwire - streaming chat client library
//!
//! This library provides a client-side streaming session engine: it streams
//! assistant replies from a model service, renders them incrementally into
//! an in-memory session store, falls back to a synchronous call when the
//! stream fails, and mirrors sessions to a remote conversation store.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: Sessions, messages, and the session store
//! - `stream`: Event stream parsing and update throttling
//! - `service`: Model service abstraction and HTTP client
//! - `engine`: Turn orchestration and the fallback state machine
//! - `persistence`: Remote store client and the synchronizer
//! - `identity`: Owner identifier for the remote store
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatwire::{ChatEngine, Config, HttpModelService, SharedSessionStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("chatwire.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let service = Arc::new(HttpModelService::new(config.service.clone())?);
//!     let engine = ChatEngine::new(SharedSessionStore::default(), service, None, config.engine);
//!     if let Some(turn) = engine.send_message("Hello!") {
//!         turn.wait().await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod persistence;
pub mod service;
pub mod session;
pub mod stream;

// Re-export commonly used types
pub use config::Config;
pub use engine::{ChatEngine, EngineEvent, TurnHandle, TurnOutcome, TurnState};
pub use error::{ChatwireError, Result};
pub use persistence::{HttpRemoteStore, PersistenceSynchronizer, RemoteStore};
pub use service::{HttpModelService, ModelService};
pub use session::{Message, Role, Session, SessionId, SessionStore, SharedSessionStore};

#[cfg(test)]
pub mod test_utils;

//! Configuration management for Chatwire
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ChatwireError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for Chatwire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model service endpoints
    #[serde(default)]
    pub service: ServiceConfig,
    /// Streaming engine pacing
    #[serde(default)]
    pub engine: EngineConfig,
    /// Remote conversation store
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Model service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the model service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the streaming endpoint
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Path of the synchronous endpoint used for fallback
    #[serde(default = "default_complete_path")]
    pub complete_path: String,

    /// Timeout for the synchronous request (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_stream_path() -> String {
    "/api/chat-stream".to_string()
}

fn default_complete_path() -> String {
    "/api/chat".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            stream_path: default_stream_path(),
            complete_path: default_complete_path(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Streaming engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum gap between content updates while streaming (milliseconds)
    #[serde(default = "default_min_update_interval")]
    pub min_update_interval_ms: u64,

    /// Characters revealed per tick when replaying a fallback reply
    #[serde(default = "default_reveal_chunk_chars")]
    pub reveal_chunk_chars: usize,

    /// Tick length of the fallback reveal (milliseconds)
    #[serde(default = "default_reveal_tick")]
    pub reveal_tick_ms: u64,

    /// Abandon a stream that produces no data for this long (seconds)
    ///
    /// Unset means wait for the transport to fail or close on its own.
    #[serde(default)]
    pub stream_idle_timeout_seconds: Option<u64>,
}

fn default_min_update_interval() -> u64 {
    30
}

fn default_reveal_chunk_chars() -> usize {
    5
}

fn default_reveal_tick() -> u64 {
    20
}

impl EngineConfig {
    /// Minimum update interval as a [`Duration`]
    pub fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.min_update_interval_ms)
    }

    /// Reveal tick as a [`Duration`]
    pub fn reveal_tick(&self) -> Duration {
        Duration::from_millis(self.reveal_tick_ms)
    }

    /// Idle timeout as a [`Duration`], if configured
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_update_interval_ms: default_min_update_interval(),
            reveal_chunk_chars: default_reveal_chunk_chars(),
            reveal_tick_ms: default_reveal_tick(),
            stream_idle_timeout_seconds: None,
        }
    }
}

/// Remote conversation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Mirror sessions to the remote store
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,

    /// Base URL of the remote store
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Owner identifier; a device id is generated when unset
    #[serde(default)]
    pub owner_id: Option<String>,
}

fn default_persistence_enabled() -> bool {
    true
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            base_url: default_base_url(),
            owner_id: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChatwireError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ChatwireError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("CHATWIRE_SERVICE_URL") {
            self.service.base_url = url;
        }

        if let Ok(url) = std::env::var("CHATWIRE_STORE_URL") {
            self.persistence.base_url = url;
        }

        if let Ok(owner) = std::env::var("CHATWIRE_OWNER_ID") {
            self.persistence.owner_id = Some(owner);
        }

        if let Ok(enabled) = std::env::var("CHATWIRE_PERSISTENCE") {
            match enabled.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.persistence.enabled = true,
                "false" | "0" | "no" => self.persistence.enabled = false,
                _ => tracing::warn!("Invalid CHATWIRE_PERSISTENCE: {}", enabled),
            }
        }

        if let Ok(interval) = std::env::var("CHATWIRE_MIN_UPDATE_INTERVAL_MS") {
            if let Ok(value) = interval.parse() {
                self.engine.min_update_interval_ms = value;
            } else {
                tracing::warn!("Invalid CHATWIRE_MIN_UPDATE_INTERVAL_MS: {}", interval);
            }
        }

        if let Ok(timeout) = std::env::var("CHATWIRE_STREAM_IDLE_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.engine.stream_idle_timeout_seconds = Some(value);
            } else {
                tracing::warn!("Invalid CHATWIRE_STREAM_IDLE_TIMEOUT_SECONDS: {}", timeout);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(url) = &cli.service_url {
            self.service.base_url = url.clone();
        }
        if let Some(url) = &cli.store_url {
            self.persistence.base_url = url.clone();
        }
        if cli.no_persist {
            self.persistence.enabled = false;
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_base_url("service.base_url", &self.service.base_url)?;
        validate_path("service.stream_path", &self.service.stream_path)?;
        validate_path("service.complete_path", &self.service.complete_path)?;

        if self.service.request_timeout_seconds == 0 {
            return Err(ChatwireError::Config(
                "service.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.engine.reveal_chunk_chars == 0 {
            return Err(ChatwireError::Config(
                "engine.reveal_chunk_chars must be greater than 0".to_string(),
            )
            .into());
        }

        if self.engine.reveal_tick_ms == 0 {
            return Err(ChatwireError::Config(
                "engine.reveal_tick_ms must be greater than 0".to_string(),
            )
            .into());
        }

        if self.engine.stream_idle_timeout_seconds == Some(0) {
            return Err(ChatwireError::Config(
                "engine.stream_idle_timeout_seconds must be greater than 0 when set".to_string(),
            )
            .into());
        }

        if self.persistence.enabled {
            validate_base_url("persistence.base_url", &self.persistence.base_url)?;
            if let Some(owner) = &self.persistence.owner_id {
                if owner.trim().is_empty() {
                    return Err(ChatwireError::Config(
                        "persistence.owner_id cannot be empty".to_string(),
                    )
                    .into());
                }
            }
        }

        Ok(())
    }
}

fn validate_base_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ChatwireError::Config(format!("{} is not a valid URL: {}", field, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ChatwireError::Config(format!(
            "{} must use http or https, got {}",
            field, other
        ))
        .into()),
    }
}

fn validate_path(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || !value.starts_with('/') {
        return Err(ChatwireError::Config(format!("{} must start with '/'", field)).into());
    }
    Ok(())
}

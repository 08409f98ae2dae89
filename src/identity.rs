//! Owner identifier for the remote conversation store
//!
//! Sessions are scoped to an owner. Unless one is configured, a random
//! device identifier is generated on first use and kept in the user's data
//! directory so later runs see the same sessions.

use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::ProjectDirs;
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::error::{ChatwireError, Result};

const DEVICE_ID_FILE: &str = "device-id";

/// Default location of the device identifier file
pub fn device_id_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "chatwire", "chatwire").ok_or_else(|| {
        ChatwireError::Persistence("Could not determine data directory".into())
    })?;
    Ok(proj_dirs.data_dir().join(DEVICE_ID_FILE))
}

/// Read the device identifier at `path`, generating it if absent
///
/// # Errors
///
/// Returns error if the file cannot be read or written.
///
/// # Examples
///
/// ```
/// use chatwire::identity::load_or_create_device_id;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("device-id");
/// let first = load_or_create_device_id(&path).unwrap();
/// assert_eq!(load_or_create_device_id(&path).unwrap(), first);
/// ```
pub fn load_or_create_device_id(path: &Path) -> Result<String> {
    if path.exists() {
        let existing = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read device id from {}", path.display()))?;
        let existing = existing.trim();
        if Uuid::parse_str(existing).is_ok() {
            return Ok(existing.to_string());
        }
        tracing::warn!("Ignoring malformed device id in {}", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create data directory")?;
    }

    let id = Uuid::new_v4().to_string();
    std::fs::write(path, &id)
        .with_context(|| format!("Failed to write device id to {}", path.display()))?;
    tracing::info!("Generated device id {}", id);
    Ok(id)
}

/// Owner identifier to use with the remote store
///
/// The configured `owner_id` wins; otherwise the device identifier.
pub fn resolve_owner_id(config: &PersistenceConfig) -> Result<String> {
    if let Some(owner) = &config.owner_id {
        return Ok(owner.clone());
    }
    load_or_create_device_id(&device_id_path()?)
}

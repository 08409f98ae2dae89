use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chatwire::config::{EngineConfig, ServiceConfig};
use chatwire::{ChatEngine, HttpModelService, HttpRemoteStore, PersistenceSynchronizer};
use chatwire::{EngineEvent, SharedSessionStore};
use tempfile::TempDir;
use tokio::sync::broadcast;

#[allow(dead_code)]
pub const OWNER: &str = "owner-test";

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("chatwire.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Event stream body for a reply made of `chunks`
#[allow(dead_code)]
pub fn sse_reply(chunks: &[&str]) -> String {
    let mut body = String::from("data: {\"type\":\"start\"}\n\n");
    for chunk in chunks {
        let envelope = serde_json::json!({"type": "chunk", "content": chunk});
        body.push_str(&format!("data: {}\n\n", envelope));
    }
    body.push_str("data: {\"type\":\"done\"}\n\n");
    body
}

/// Engine config with short timers
#[allow(dead_code)]
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        min_update_interval_ms: 5,
        reveal_tick_ms: 2,
        ..EngineConfig::default()
    }
}

/// Engine talking to a model service at `service_uri`, optionally
/// persisting to a store at `store_uri`
#[allow(dead_code)]
pub fn engine_for(service_uri: &str, store_uri: Option<&str>, config: EngineConfig) -> ChatEngine {
    let store = SharedSessionStore::default();
    let service = HttpModelService::new(ServiceConfig {
        base_url: service_uri.to_string(),
        request_timeout_seconds: 5,
        ..ServiceConfig::default()
    })
    .expect("failed to build model service");

    let persistence = store_uri.map(|uri| {
        let remote = HttpRemoteStore::new(uri).expect("failed to build remote store");
        PersistenceSynchronizer::new(store.clone(), Arc::new(remote), OWNER)
    });

    ChatEngine::new(store, Arc::new(service), persistence, config)
}

/// Content updates already delivered to `events`
#[allow(dead_code)]
pub fn drain_contents(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::ContentUpdated { content, .. } = event {
            out.push(content);
        }
    }
    out
}

/// JSON record the remote store would return
#[allow(dead_code)]
pub fn remote_record(id: &str, title: &str) -> serde_json::Value {
    serde_json::json!({
        "_id": id,
        "title": title,
        "messages": [],
        "userId": OWNER,
        "lastUpdated": "2024-05-01T12:00:00Z",
        "createdAt": "2024-05-01T12:00:00Z"
    })
}

//! Durable shared store — the only channel between the interception task
//! and the watcher task.
//!
//! Contract: per-key last-write-wins, no transactions. Both sides of an
//! operation derive the same composite key from the correlation ID and a
//! CRC32 checksum of the match pattern.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::WireResult;

/// Well-known key holding the trigger flag.
pub const TRIGGER_KEY: &str = "x-trigger-web-ext";

/// Lowercase-hex CRC32 of a match pattern.
pub fn pattern_checksum(pattern: &str) -> String {
    format!("{:08x}", crc32fast::hash(pattern.as_bytes()))
}

/// Composite key for one in-flight operation: `data-<requestId>-<checksum>`.
pub fn phase_key(request_id: &str, pattern: &str) -> String {
    format!("data-{}-{}", request_id, pattern_checksum(pattern))
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn set(&self, key: &str, value: Value) -> WireResult<()>;
    async fn get(&self, key: &str) -> WireResult<Option<Value>>;
    async fn remove(&self, key: &str) -> WireResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store. Both contexts hold the same `Arc`, so a write from
/// the interception task is immediately visible to the watcher task.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn set(&self, key: &str, value: Value) -> WireResult<()> {
        self.inner.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> WireResult<Option<Value>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> WireResult<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// One JSON file per key under the configured directory, so phase records
/// and the trigger flag survive a page reload mid-operation.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Filesystem-safe filename for a store key.
    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl SharedStore for FileStore {
    async fn set(&self, key: &str, value: Value) -> WireResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let raw = serde_json::to_vec(&value)?;
        tokio::fs::write(self.path_for(key), raw).await?;
        debug!("store: wrote {}", key);
        Ok(())
    }

    async fn get(&self, key: &str) -> WireResult<Option<Value>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> WireResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phase_key_is_deterministic() {
        let a = phase_key("r1", "/api/v2/chat/completions");
        let b = phase_key("r1", "/api/v2/chat/completions");
        assert_eq!(a, b);
        assert!(a.starts_with("data-r1-"));
        // Checksum is the crc32 of the pattern alone.
        assert_ne!(a, phase_key("r1", "/api/chat"));
    }

    #[tokio::test]
    async fn memory_store_last_write_wins() {
        let store = MemoryStore::new();
        store.set("k", json!(1)).await.unwrap();
        store.set("k", json!(2)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let dir = std::env::temp_dir().join(format!("chatwire-store-{}", std::process::id()));
        let writer = FileStore::new(dir.clone());
        writer
            .set("data-r1-deadbeef", json!({"phase": "DATA"}))
            .await
            .unwrap();

        // A fresh instance over the same directory sees the record.
        let reader = FileStore::new(dir.clone());
        let v = reader.get("data-r1-deadbeef").await.unwrap().unwrap();
        assert_eq!(v["phase"], "DATA");

        reader.remove("data-r1-deadbeef").await.unwrap();
        assert_eq!(reader.get("data-r1-deadbeef").await.unwrap(), None);
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}

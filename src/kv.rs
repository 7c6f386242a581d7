//! Durable key-value contract backing TTS job state and the router counter.
//!
//! Production uses the embedded `sled` database; tests (and throwaway
//! deployments) use the in-memory map. Values are strings, JSON-encoded by
//! the callers.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// Removes every key starting with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<()>;
}

// =================================================
// sled
// =================================================

pub struct SledKv {
    db: sled::Db,
}

impl SledKv {
    pub fn open(path: &std::path::Path) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl KvStore for SledKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = self.db.get(key.as_bytes())?;
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.db.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<()> {
        let keys: Vec<sled::IVec> = self
            .db
            .scan_prefix(prefix.as_bytes())
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.db.remove(key)?;
        }
        Ok(())
    }
}

// =================================================
// in-memory
// =================================================

#[derive(Default, Clone)]
pub struct MemoryKv {
    map: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.map.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.map.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<()> {
        self.map.write().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_round_trip_and_prefix_delete() {
        let kv = MemoryKv::new();
        kv.put("job:1:text", "hello").await.unwrap();
        kv.put("job:1:voiceId", "Kore").await.unwrap();
        kv.put("job:2:text", "other").await.unwrap();
        assert_eq!(kv.get("job:1:text").await.unwrap().as_deref(), Some("hello"));

        kv.delete_prefix("job:1:").await.unwrap();
        assert!(kv.get("job:1:text").await.unwrap().is_none());
        assert!(kv.get("job:1:voiceId").await.unwrap().is_none());
        assert_eq!(kv.get("job:2:text").await.unwrap().as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn sled_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let kv = SledKv::open(dir.path()).unwrap();
        kv.put("counter:global-router-counter", "41").await.unwrap();
        assert_eq!(
            kv.get("counter:global-router-counter").await.unwrap().as_deref(),
            Some("41")
        );
        kv.delete("counter:global-router-counter").await.unwrap();
        assert!(kv.get("counter:global-router-counter").await.unwrap().is_none());
    }
}

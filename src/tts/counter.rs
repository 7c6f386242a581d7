//! Durable named monotonic counter used as the round-robin cursor for
//! worker selection.
//!
//! One logical record per name; the read-increment-write cycle is serialized
//! by a per-name async mutex so no two callers ever observe the same value.

use crate::kv::KvStore;
use crate::retry::RetryPolicy;
use crate::types::constants::{KV_RETRY_ATTEMPTS, KV_RETRY_INITIAL_MS};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct RouterCounter {
    kv: Arc<dyn KvStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    retry: RetryPolicy,
}

impl RouterCounter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            locks: DashMap::new(),
            retry: RetryPolicy::new(
                KV_RETRY_ATTEMPTS - 1,
                Duration::from_millis(KV_RETRY_INITIAL_MS),
                2.0,
            ),
        }
    }

    fn key(name: &str) -> String {
        format!("counter:{}", name)
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Atomically increments the named counter and returns the new value.
    pub async fn increment(&self, name: &str) -> anyhow::Result<i64> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let key = Self::key(name);
        let current = self
            .kv
            .get(&key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        let value = next.to_string();
        self.retry
            .run(|| self.kv.put(&key, &value), |_| true)
            .await?;
        Ok(next)
    }

    /// Reads the current value without advancing it.
    pub async fn get(&self, name: &str) -> anyhow::Result<i64> {
        Ok(self
            .kv
            .get(&Self::key(name))
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0))
    }
}

//! Durable per-job TTS state.
//!
//! One record per job, stored as individual keys under `job:{id}:` so a
//! single field update never rewrites the audio chunks of a long job.
//! Storage writes are retried with exponential backoff; a five-minute
//! inactivity timer purges abandoned jobs.

use crate::kv::KvStore;
use crate::retry::RetryPolicy;
use crate::types::constants::{
    KV_RETRY_ATTEMPTS, KV_RETRY_INITIAL_MS, TTS_JOB_IDLE_SECS,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Index used by `currentSentenceIndex` before any chunk has been written.
pub const NO_PROGRESS: i64 = -1;

#[derive(Debug, Clone, Default)]
pub struct TtsJobState {
    pub text: String,
    pub voice_id: String,
    pub initialised: bool,
    /// High-water mark: the largest sentence index ever written.
    pub current_sentence_index: i64,
    /// Sparse chunk map; `Some(None)` records an explicit failure.
    pub audio_chunks: HashMap<u32, Option<String>>,
    pub last_error: Option<String>,
    pub error_timestamp: Option<i64>,
}

impl TtsJobState {
    /// The chunk at an index, if present and successful.
    pub fn successful_chunk(&self, index: u32) -> Option<&str> {
        self.audio_chunks
            .get(&index)
            .and_then(|chunk| chunk.as_deref())
    }
}

pub struct JobStore {
    kv: Arc<dyn KvStore>,
    retry: RetryPolicy,
    /// Serializes mutations per job; concurrent sentence workers would
    /// otherwise lose chunk writes in the read-modify-write cycle.
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Generation per job; bumping it invalidates the pending idle purge.
    generations: Arc<DashMap<String, u64>>,
    idle_timeout: Duration,
}

fn field_key(job_id: &str, field: &str) -> String {
    format!("job:{}:{}", job_id, field)
}

impl JobStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_idle_timeout(kv, Duration::from_secs(TTS_JOB_IDLE_SECS))
    }

    pub fn with_idle_timeout(kv: Arc<dyn KvStore>, idle_timeout: Duration) -> Self {
        Self {
            kv,
            retry: RetryPolicy::new(
                KV_RETRY_ATTEMPTS - 1,
                Duration::from_millis(KV_RETRY_INITIAL_MS),
                2.0,
            ),
            locks: DashMap::new(),
            generations: Arc::new(DashMap::new()),
            idle_timeout,
        }
    }

    fn lock_for(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn put_retrying(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.retry.run(|| self.kv.put(key, value), |_| true).await
    }

    /// Reads the full job record; missing fields fall back to defaults so a
    /// half-written job still loads.
    pub async fn get_state(&self, job_id: &str) -> anyhow::Result<TtsJobState> {
        let get = |field: &'static str| {
            let kv = self.kv.clone();
            let key = field_key(job_id, field);
            async move { kv.get(&key).await }
        };

        let text = get("text").await?.unwrap_or_default();
        let voice_id = get("voiceId").await?.unwrap_or_default();
        let initialised = get("initialised").await?.as_deref() == Some("true");
        let current_sentence_index = get("currentSentenceIndex")
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(NO_PROGRESS);
        let audio_chunks = get("audioChunks")
            .await?
            .and_then(|raw| serde_json::from_str::<HashMap<u32, Option<String>>>(&raw).ok())
            .unwrap_or_default();
        let last_error = get("lastError").await?;
        let error_timestamp = get("errorTimestamp")
            .await?
            .and_then(|v| v.parse::<i64>().ok());

        Ok(TtsJobState {
            text,
            voice_id,
            initialised,
            current_sentence_index,
            audio_chunks,
            last_error,
            error_timestamp,
        })
    }

    /// Idempotent initialization: an already-initialised job with the same
    /// text and voice is left untouched so a resumed request keeps its
    /// progress; anything else resets indices and chunks.
    pub async fn initialize(
        self: &Arc<Self>,
        job_id: &str,
        text: &str,
        voice_id: &str,
    ) -> anyhow::Result<()> {
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;
        let existing = self.get_state(job_id).await.unwrap_or_default();
        if existing.initialised && existing.text == text && existing.voice_id == voice_id {
            self.touch(job_id);
            return Ok(());
        }

        self.put_retrying(&field_key(job_id, "text"), text).await?;
        self.put_retrying(&field_key(job_id, "voiceId"), voice_id)
            .await?;
        self.put_retrying(&field_key(job_id, "initialised"), "true")
            .await?;
        self.put_retrying(
            &field_key(job_id, "currentSentenceIndex"),
            &NO_PROGRESS.to_string(),
        )
        .await?;
        self.put_retrying(&field_key(job_id, "audioChunks"), "{}")
            .await?;
        self.kv.delete(&field_key(job_id, "lastError")).await.ok();
        self.kv
            .delete(&field_key(job_id, "errorTimestamp"))
            .await
            .ok();
        self.touch(job_id);
        Ok(())
    }

    /// Records one sentence outcome: the chunk (or an explicit null), the
    /// new high-water mark, and the error bookkeeping.
    pub async fn update_progress(
        self: &Arc<Self>,
        job_id: &str,
        index: u32,
        chunk: Option<String>,
        error: Option<String>,
    ) -> anyhow::Result<()> {
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;
        let mut state = self.get_state(job_id).await.unwrap_or_default();
        state.audio_chunks.insert(index, chunk);
        let chunks = serde_json::to_string(&state.audio_chunks)?;
        self.put_retrying(&field_key(job_id, "audioChunks"), &chunks)
            .await?;

        let high_water = state.current_sentence_index.max(index as i64);
        self.put_retrying(
            &field_key(job_id, "currentSentenceIndex"),
            &high_water.to_string(),
        )
        .await?;

        match error {
            Some(message) => {
                self.put_retrying(&field_key(job_id, "lastError"), &message)
                    .await?;
                self.put_retrying(
                    &field_key(job_id, "errorTimestamp"),
                    &chrono::Utc::now().timestamp_millis().to_string(),
                )
                .await?;
            }
            None => {
                self.kv.delete(&field_key(job_id, "lastError")).await.ok();
                self.kv
                    .delete(&field_key(job_id, "errorTimestamp"))
                    .await
                    .ok();
            }
        }
        self.touch(job_id);
        Ok(())
    }

    /// Purges the durable record.
    pub async fn delete_all(&self, job_id: &str) -> anyhow::Result<()> {
        self.generations.remove(job_id);
        self.locks.remove(job_id);
        self.kv.delete_prefix(&format!("job:{}:", job_id)).await
    }

    /// Re-arms the inactivity alarm; when it fires with no intervening
    /// activity the job is cleared.
    pub fn touch(self: &Arc<Self>, job_id: &str) {
        let generation = {
            let mut entry = self.generations.entry(job_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        let store = self.clone();
        let job_id = job_id.to_string();
        let idle = self.idle_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let still_current = store
                .generations
                .get(&job_id)
                .map(|g| *g == generation)
                .unwrap_or(false);
            if still_current {
                log::info!("tts job {} idle for {:?}, clearing state", job_id, idle);
                if let Err(e) = store.delete_all(&job_id).await {
                    log::warn!("failed to clear idle tts job {}: {}", job_id, e);
                }
            }
        });
    }

}

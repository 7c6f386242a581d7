//! The TTS backend worker pool: per-worker circuit breakers and the
//! single-sentence synthesis call with its retry classification.

use crate::retry::RetryPolicy;
use crate::types::constants::{
    TTS_FIRST_SENTENCE_TIMEOUT_SECS, TTS_MAX_RETRIES, TTS_RETRY_INITIAL_MS,
    TTS_SENTENCE_TIMEOUT_SECS,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Consecutive failures before a worker's breaker opens.
const BREAKER_FAILURE_THRESHOLD: u32 = 5;
/// How long an open breaker refuses traffic before admitting one probe.
const BREAKER_RESET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SynthError {
    /// Non-2xx from the worker; retried only for 5xx and 429.
    #[error("HTTP error Status {status}{detail}")]
    Status { status: u16, detail: String },
    /// Connection-level failure; always retried.
    #[error("transport error: {0}")]
    Transport(String),
    /// The worker's circuit breaker is open; terminal for this attempt.
    #[error("worker unavailable (circuit open)")]
    BreakerOpen,
}

impl SynthError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SynthError::Status { status, .. } => *status >= 500 || *status == 429,
            SynthError::Transport(_) => true,
            SynthError::BreakerOpen => false,
        }
    }
}

// =================================================
// Circuit breaker
// =================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// CLOSED → OPEN on N consecutive failures; OPEN refuses traffic until the
/// reset timeout, then HALF_OPEN admits exactly one probe.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_reset_timeout(BREAKER_RESET_TIMEOUT)
    }

    pub fn with_reset_timeout(reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            reset_timeout,
        }
    }

    /// Asks permission for one call. `false` means the breaker is open.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= BREAKER_FAILURE_THRESHOLD {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }
}

// =================================================
// Worker pool
// =================================================

struct Worker {
    url: String,
    breaker: CircuitBreaker,
}

#[derive(Deserialize)]
struct WorkerReply {
    #[serde(rename = "audioContentBase64")]
    audio_content_base64: Option<String>,
    error: Option<WorkerError>,
}

#[derive(Deserialize)]
struct WorkerError {
    message: String,
}

pub struct BackendPool {
    workers: Vec<Worker>,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl BackendPool {
    pub fn new(urls: Vec<String>, client: reqwest::Client) -> Self {
        Self {
            workers: urls
                .into_iter()
                .map(|url| Worker {
                    url,
                    breaker: CircuitBreaker::new(),
                })
                .collect(),
            client,
            retry: RetryPolicy::new(
                TTS_MAX_RETRIES,
                Duration::from_millis(TTS_RETRY_INITIAL_MS),
                2.0,
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The per-sentence timeout; the first sentence gets the longer one.
    pub fn timeout_for(sentence_index: u32) -> Duration {
        if sentence_index == 0 {
            Duration::from_secs(TTS_FIRST_SENTENCE_TIMEOUT_SECS)
        } else {
            Duration::from_secs(TTS_SENTENCE_TIMEOUT_SECS)
        }
    }

    async fn attempt(
        &self,
        worker: &Worker,
        text: &str,
        voice_id: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<String, SynthError> {
        if !worker.breaker.try_acquire() {
            return Err(SynthError::BreakerOpen);
        }

        let result = self
            .client
            .post(&worker.url)
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({ "text": text, "voiceId": voice_id }))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                worker.breaker.on_failure();
                return Err(SynthError::Transport(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        let body = response.bytes().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            worker.breaker.on_failure();
            let detail = match serde_json::from_slice::<WorkerReply>(&body) {
                Ok(reply) => reply
                    .error
                    .map(|e| format!(": {}", e.message))
                    .unwrap_or_default(),
                Err(_) => {
                    let text = String::from_utf8_lossy(&body);
                    let text = text.trim();
                    if text.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", text)
                    }
                }
            };
            return Err(SynthError::Status { status, detail });
        }

        match serde_json::from_slice::<WorkerReply>(&body) {
            Ok(WorkerReply {
                audio_content_base64: Some(audio),
                ..
            }) => {
                worker.breaker.on_success();
                Ok(audio)
            }
            Ok(WorkerReply { error, .. }) => {
                worker.breaker.on_failure();
                Err(SynthError::Transport(
                    error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "worker returned no audio".to_string()),
                ))
            }
            Err(e) => {
                worker.breaker.on_failure();
                Err(SynthError::Transport(format!(
                    "undecodable worker reply: {}",
                    e
                )))
            }
        }
    }

    /// Synthesizes one sentence on the given worker, retrying per the policy
    /// (1 s initial, doubling, 3 retries) on 5xx/429 and transport failures.
    pub async fn synthesize(
        &self,
        worker_index: usize,
        sentence_index: u32,
        text: &str,
        voice_id: &str,
        api_key: &str,
    ) -> Result<String, SynthError> {
        let worker = &self.workers[worker_index % self.workers.len()];
        let timeout = Self::timeout_for(sentence_index);
        self.retry
            .run(
                || self.attempt(worker, text, voice_id, api_key, timeout),
                SynthError::is_retryable,
            )
            .await
    }
}

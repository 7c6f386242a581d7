//! Long-form TTS: sentence splitting, worker fan-out with retries and a
//! global round-robin cursor, durable resumable job state, and SSE emission.

pub mod counter;
pub mod orchestrator;
pub mod state;
pub mod text;
pub mod worker;


use crate::kv::KvStore;
use std::sync::Arc;

pub use orchestrator::TtsRequest;

/// Everything a TTS request needs, bundled so handlers stay thin.
pub struct TtsEngine {
    pub jobs: Arc<state::JobStore>,
    pub counter: Arc<counter::RouterCounter>,
    pub backends: Arc<worker::BackendPool>,
}

impl TtsEngine {
    pub fn new(kv: Arc<dyn KvStore>, backends: Vec<String>, client: reqwest::Client) -> Self {
        Self {
            jobs: Arc::new(state::JobStore::new(kv.clone())),
            counter: Arc::new(counter::RouterCounter::new(kv)),
            backends: Arc::new(worker::BackendPool::new(backends, client)),
        }
    }
}

//! Round-robin rotation over the upstream API key pool.
//!
//! The cursor is a process-wide atomic advanced once per incoming request,
//! not per upstream call, so parallel requests spread evenly across keys.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct CredentialPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    /// Pool construction fails fast; request-time selection is infallible.
    pub fn new(keys: Vec<String>) -> Result<Self, String> {
        if keys.is_empty() {
            return Err("credential pool must contain at least one key".to_string());
        }
        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Selects the next key and advances the cursor.
    pub fn next_key(&self) -> &str {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.keys.len();
        &self.keys[index]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

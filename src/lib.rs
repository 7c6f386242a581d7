//! # gemway
//!
//! An OpenAI-compatible API gateway in front of Google's Generative Language
//! (Gemini) backend. Clients speak OpenAI chat/embeddings/models or Anthropic
//! Messages; the gateway translates to and from Gemini's wire format,
//! including streaming. A secondary surface performs long-form text-to-speech
//! by fanning sentences out over a pool of backend workers with resumable,
//! durable job state.

pub mod auth;
pub mod claude;
pub mod config;
pub mod credential;
pub mod error;
pub mod handler;
pub mod kv;
pub mod logger;
pub mod retry;
pub mod router;
pub mod sse;
pub mod transform;
pub mod tts;
pub mod types;
pub mod upstream;

pub use config::AppConfig;
pub use error::{GatewayError, ProxyResult};
pub use router::AppState;

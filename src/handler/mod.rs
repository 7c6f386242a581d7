//! Request handlers behind the gateway router.

pub mod chat;
pub mod embeddings;
pub mod messages;
pub mod models;
pub mod tts;

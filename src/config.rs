//! Runtime configuration, read once from the environment at startup.
//!
//! Upstream API keys (`KEY1..KEYN`) and TTS backend workers
//! (`BACKEND_SERVICE_1..N`) are numbered contiguously from 1; scanning stops
//! at the first missing index.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Default upstream endpoint for the Generative Language API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Default upstream API version path segment.
pub const DEFAULT_API_VERSION: &str = "v1beta";
/// Model used when a request omits one and `DEFAULT_MODEL` is unset.
pub const FALLBACK_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Client-facing bearer secret (`PASS`).
    pub pass: String,
    /// Upstream Gemini API keys, in `KEY1..N` order.
    pub api_keys: Vec<String>,
    /// TTS backend worker base URLs, in `BACKEND_SERVICE_1..N` order.
    pub backend_services: Vec<String>,
    /// Model substituted when the client omits one.
    pub default_model: String,
    /// Upstream base URL, `OPENAI_API_BASE_URL` override or the Google default.
    pub base_url: String,
    /// Upstream API version segment.
    pub api_version: String,
    /// Socket the gateway listens on.
    pub listen_addr: SocketAddr,
    /// Directory for the embedded sled database.
    pub data_dir: PathBuf,
    /// Optional detailed log file.
    pub log_file: Option<PathBuf>,
    /// Log raw request/response bodies to the wire target.
    pub debug_body_log: bool,
}

impl AppConfig {
    /// Reads the full configuration from the process environment.
    pub fn from_env() -> Result<Self, String> {
        let pass = std::env::var("PASS")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| "PASS is required but not set".to_string())?;

        let api_keys = scan_numbered("KEY");
        if api_keys.is_empty() {
            return Err("no upstream API keys configured (KEY1..KEYN)".to_string());
        }

        let backend_services = scan_numbered("BACKEND_SERVICE_")
            .into_iter()
            .map(|url| url.trim_end_matches('/').to_string())
            .collect();

        let listen_addr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| format!("invalid LISTEN_ADDR: {}", e))?;

        Ok(Self {
            pass,
            api_keys,
            backend_services,
            default_model: std::env::var("DEFAULT_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_MODEL.to_string()),
            base_url: std::env::var("OPENAI_API_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_version: std::env::var("API_VERSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            listen_addr,
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            log_file: std::env::var("LOG_FILE").ok().map(PathBuf::from),
            debug_body_log: std::env::var("DEBUG_BODY_LOG")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}

/// Collects `{prefix}1`, `{prefix}2`, … until the first missing index.
fn scan_numbered(prefix: &str) -> Vec<String> {
    let mut values = Vec::new();
    for i in 1.. {
        match std::env::var(format!("{}{}", prefix, i)) {
            Ok(v) if !v.trim().is_empty() => values.push(v.trim().to_string()),
            _ => break,
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; each uses its own prefix to stay
    // independent of test ordering.

    #[test]
    fn scan_stops_at_first_gap() {
        std::env::set_var("SCANTEST_A1", "one");
        std::env::set_var("SCANTEST_A2", "two");
        std::env::set_var("SCANTEST_A4", "four");
        let values = scan_numbered("SCANTEST_A");
        assert_eq!(values, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn scan_ignores_blank_entries() {
        std::env::set_var("SCANTEST_B1", "  ");
        let values = scan_numbered("SCANTEST_B");
        assert!(values.is_empty());
    }
}

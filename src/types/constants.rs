//! Immutable dialect constants: field maps, finish-reason translation, SSE
//! framing, safety defaults, voice-name patterns, and operational limits.

use crate::types::gemini::GeminiSafetySetting;
use lazy_static::lazy_static;
use regex::bytes::Regex as BytesRegex;
use regex::Regex;

/// Delimiter terminating one outgoing SSE frame.
pub const SSE_DELIMITER: &str = "\n\n";

/// Separator used when joining multiple text parts of one candidate.
pub const PART_SEPARATOR: &str = "\n\n|>";

/// Literal terminator of an OpenAI-compatible stream.
pub const SSE_DONE_FRAME: &str = "data: [DONE]\n\n";

/// Identifier sent upstream in `x-goog-api-client`.
pub const UPSTREAM_CLIENT_ID: &str = concat!("gemway/", env!("CARGO_PKG_VERSION"));

/// Data centers with known upstream reachability issues; requests arriving
/// through them are refused with 429.
pub const RESTRICTED_COLOS: [&str; 4] = ["DME", "LED", "SVX", "KJA"];

/// Mime type stamped on TTS `message` events.
pub const TTS_AUDIO_MIME: &str = "audio/wav";

/// Ceiling for concurrent sentence synthesis per job.
pub const TTS_CONCURRENCY: usize = 5;
/// Retries after the initial attempt for a failed sentence POST.
pub const TTS_MAX_RETRIES: u32 = 3;
/// First retry delay for a failed sentence POST.
pub const TTS_RETRY_INITIAL_MS: u64 = 1_000;
/// Per-sentence synthesis timeout.
pub const TTS_SENTENCE_TIMEOUT_SECS: u64 = 15;
/// The first sentence gets longer, covering worker cold starts.
pub const TTS_FIRST_SENTENCE_TIMEOUT_SECS: u64 = 20;
/// Job state is purged after this much inactivity.
pub const TTS_JOB_IDLE_SECS: u64 = 300;

/// Durable-store write retry parameters.
pub const KV_RETRY_ATTEMPTS: u32 = 5;
pub const KV_RETRY_INITIAL_MS: u64 = 200;

/// Name of the single shared round-robin counter.
pub const ROUTER_COUNTER_NAME: &str = "global-router-counter";

lazy_static! {
    /// A complete Gemini SSE data line at the head of the buffer. The three
    /// delimiter spellings cover LF, CR, and CRLF framing seen in the wild.
    pub static ref SSE_DATA_LINE_RE: BytesRegex =
        BytesRegex::new(r"^data: (.*)(?:\n\n|\r\r|\r\n\r\n)").unwrap();

    /// `<thinking>…</thinking>` spans stripped from refined-mode content.
    pub static ref THINKING_TAG_RE: Regex =
        Regex::new(r"(?s)<thinking>.*?</thinking>").unwrap();

    /// Standard locale-prefixed voice names, e.g. `en-US-Standard-A`.
    pub static ref VOICE_LOCALE_RE: Regex =
        Regex::new(r"^[a-z]{2,3}-[A-Z]{2}-[A-Za-z0-9-]+$").unwrap();

    /// Gemini-style single-word voice names, e.g. `Kore`, `Puck`.
    pub static ref VOICE_GEMINI_RE: Regex = Regex::new(r"^[A-Z][a-z]+$").unwrap();
}

/// Maps a Gemini finish reason onto the OpenAI vocabulary. Unknown reasons
/// pass through lowercased so clients still see something actionable.
pub fn map_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        "SAFETY" | "RECITATION" => "content_filter".to_string(),
        other => other.to_lowercase(),
    }
}

/// Reasoning-effort level to thinking-budget tokens.
pub fn effort_budget(level: &str) -> Option<i32> {
    match level {
        "none" => Some(0),
        "low" => Some(1_024),
        "medium" => Some(8_192),
        "high" => Some(24_576),
        _ => None,
    }
}

/// The five harm categories, all disabled. The gateway delegates moderation
/// to the caller's own policy layer.
pub fn default_safety_settings() -> Vec<GeminiSafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
        "HARM_CATEGORY_CIVIC_INTEGRITY",
    ]
    .iter()
    .map(|category| GeminiSafetySetting {
        category: category.to_string(),
        threshold: "BLOCK_NONE".to_string(),
    })
    .collect()
}

/// True when the name looks like a voice either pattern accepts.
pub fn is_valid_voice(name: &str) -> bool {
    VOICE_LOCALE_RE.is_match(name) || VOICE_GEMINI_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_table() {
        assert_eq!(map_finish_reason("STOP"), "stop");
        assert_eq!(map_finish_reason("MAX_TOKENS"), "length");
        assert_eq!(map_finish_reason("SAFETY"), "content_filter");
        assert_eq!(map_finish_reason("RECITATION"), "content_filter");
        assert_eq!(map_finish_reason("OTHER"), "other");
    }

    #[test]
    fn effort_budget_levels() {
        assert_eq!(effort_budget("none"), Some(0));
        assert_eq!(effort_budget("low"), Some(1_024));
        assert_eq!(effort_budget("medium"), Some(8_192));
        assert_eq!(effort_budget("high"), Some(24_576));
        assert_eq!(effort_budget("extreme"), None);
    }

    #[test]
    fn safety_settings_cover_five_categories() {
        let settings = default_safety_settings();
        assert_eq!(settings.len(), 5);
        assert!(settings.iter().all(|s| s.threshold == "BLOCK_NONE"));
    }

    #[test]
    fn voice_patterns() {
        assert!(is_valid_voice("en-US-Standard-A"));
        assert!(is_valid_voice("cmn-CN-Wavenet-B"));
        assert!(is_valid_voice("Kore"));
        assert!(!is_valid_voice("not a voice"));
        assert!(!is_valid_voice(""));
    }

    #[test]
    fn sse_data_line_regex_matches_all_delimiters() {
        for tail in ["\n\n", "\r\r", "\r\n\r\n"] {
            let line = format!("data: {{\"x\":1}}{}", tail);
            let caps = SSE_DATA_LINE_RE.captures(line.as_bytes()).unwrap();
            assert_eq!(&caps[1], b"{\"x\":1}");
        }
        assert!(SSE_DATA_LINE_RE.captures(b"data: {\"x\":1}\n").is_none());
    }
}

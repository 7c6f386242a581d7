//! Model-name suffix parsing.
//!
//! A requested model name may carry reasoning and search decorations:
//! `gemini-2.0-flash-thinking-high`, `gemini-2.5-pro-refined-medium:search`,
//! `gemini-2.0-flash-search-preview`. Parsing is greedy longest-match and
//! strips suffixes until only the base model remains.

use crate::types::constants::effort_budget;
use crate::types::gemini::GeminiThinkingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingMode {
    Standard,
    /// Reasoning on; thought parts are returned to the client.
    Thinking,
    /// Reasoning on; `<thinking>…</thinking>` text is stripped from replies.
    Refined,
}

impl ThinkingMode {
    pub fn is_refined(&self) -> bool {
        matches!(self, ThinkingMode::Refined)
    }
}

#[derive(Debug, Clone)]
pub struct ModelTag {
    pub base_model: String,
    pub mode: ThinkingMode,
    /// Thinking-budget tokens derived from the suffix level.
    pub budget: i32,
    /// Google-search tool requested via `:search` or `-search-preview`.
    pub search: bool,
}

impl ModelTag {
    /// The thinking config the suffix implies; `None` for standard mode or a
    /// zero budget.
    pub fn thinking_config(&self) -> Option<GeminiThinkingConfig> {
        if self.mode == ThinkingMode::Standard || self.budget <= 0 {
            return None;
        }
        Some(GeminiThinkingConfig {
            thinking_budget: self.budget,
            include_thoughts: self.mode == ThinkingMode::Thinking,
        })
    }
}

const LEVELS: [&str; 4] = ["none", "low", "medium", "high"];

// Matches `{name}-{marker}-{level}` at the tail, returning the stripped base
// and the level.
fn strip_leveled_suffix<'a>(name: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    for level in LEVELS {
        let suffix = format!("-{}-{}", marker, level);
        if let Some(base) = name.strip_suffix(&suffix) {
            if !base.is_empty() {
                return Some((base, level));
            }
        }
    }
    None
}

/// Parses decorations off a requested model name. `-refined-<level>` is
/// tested before `-thinking-<level>`, and the search suffixes before giving
/// up, so combined decorations resolve in one pass.
pub fn parse_model_name(name: &str) -> ModelTag {
    let mut base = name.trim().to_string();
    let mut mode = ThinkingMode::Standard;
    let mut budget = 0;
    let mut search = false;

    loop {
        if let Some(stripped) = base.strip_suffix(":search") {
            base = stripped.to_string();
            search = true;
            continue;
        }
        if let Some(stripped) = base.strip_suffix("-search-preview") {
            base = stripped.to_string();
            search = true;
            continue;
        }
        if mode == ThinkingMode::Standard {
            if let Some((stripped, level)) = strip_leveled_suffix(&base, "refined") {
                budget = effort_budget(level).unwrap_or(0);
                mode = ThinkingMode::Refined;
                base = stripped.to_string();
                continue;
            }
            if let Some((stripped, level)) = strip_leveled_suffix(&base, "thinking") {
                budget = effort_budget(level).unwrap_or(0);
                mode = ThinkingMode::Thinking;
                base = stripped.to_string();
                continue;
            }
        }
        break;
    }

    ModelTag {
        base_model: base,
        mode,
        budget,
        search,
    }
}

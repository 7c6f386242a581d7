//! Anthropic Messages dialect types.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default, deserialize_with = "deserialize_system_field")]
    pub system: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ClaudeTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ClaudeToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeMessage {
    pub role: String, // "user" or "assistant"
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<ClaudeContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ClaudeImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, deserialize_with = "deserialize_tool_result_content")]
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeImageSource {
    #[serde(rename = "type")]
    pub source_type: String, // "base64" or "url"
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeToolChoice {
    Auto,
    Any,
    None,
    Tool { name: String },
}

// =================================================
// Response
// =================================================

#[derive(Debug, Clone, Serialize)]
pub struct ClaudeResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String, // "message"
    pub role: String,          // "assistant"
    pub content: Vec<ClaudeContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: ClaudeUsage,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ClaudeUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Error envelope of the Anthropic dialect.
#[derive(Debug, Clone, Serialize)]
pub struct ClaudeErrorEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: String, // "error"
    pub error: ClaudeErrorBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaudeErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl ClaudeErrorEnvelope {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            envelope_type: "error".to_string(),
            error: ClaudeErrorBody {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }
}

// =================================================
// Flexible deserialization
// =================================================

// Content may be a bare string or an array of blocks.
fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<ClaudeContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ContentInput {
        String(String),
        Array(Vec<ClaudeContentBlock>),
    }

    Ok(match ContentInput::deserialize(deserializer)? {
        ContentInput::String(text) => vec![ClaudeContentBlock::Text { text }],
        ContentInput::Array(blocks) => blocks,
    })
}

// tool_result content may be a string or nested content blocks; flatten the
// text either way.
fn deserialize_tool_result_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ResultContent {
        String(String),
        Blocks(Vec<Value>),
    }

    Ok(
        match Option::<ResultContent>::deserialize(deserializer)? {
            Some(ResultContent::String(s)) => s,
            Some(ResultContent::Blocks(blocks)) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        },
    )
}

// The top-level system prompt may be a string or an array of text blocks.
fn deserialize_system_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct SystemBlock {
        text: String,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SystemInput {
        String(String),
        Array(Vec<SystemBlock>),
    }

    Ok(match Option::<SystemInput>::deserialize(deserializer)? {
        Some(SystemInput::String(s)) => Some(s),
        Some(SystemInput::Array(blocks)) => {
            let joined = blocks
                .into_iter()
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n\n");
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        None => None,
    })
}

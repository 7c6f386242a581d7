//! Gemini SSE byte stream → OpenAI SSE byte stream.
//!
//! Two cooperating stages. Stage 1 (`SseFramer`) owns the framing state: it
//! accumulates raw bytes and yields complete `data:` payloads bounded by the
//! Gemini SSE line regex; whatever is left at end-of-stream comes out flagged
//! as a buffered remainder. Stage 2 (`ChunkTransformer`) owns the rendering
//! state: per-candidate sent-role flags and the deferred final chunk, so that
//! clients can concatenate deltas and read the finish reason last.

use crate::transform::model_tag::ThinkingMode;
use crate::types::constants::{
    map_finish_reason, PART_SEPARATOR, SSE_DATA_LINE_RE, SSE_DELIMITER, SSE_DONE_FRAME,
};
use crate::types::gemini::GeminiResponse;
use crate::types::openai::{
    ChatCompletionChunk, Delta, FunctionCall, StreamChoice, ToolCall, Usage,
};
use bytes::BytesMut;
use std::collections::{BTreeMap, HashMap};

// =================================================
// Stage 1: framing
// =================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FramedPayload {
    pub text: String,
    /// True for the residual buffer emitted at end-of-stream; stage 2
    /// forwards it verbatim.
    pub buffered_remainder: bool,
}

#[derive(Default)]
pub struct SseFramer {
    buffer: BytesMut,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes in; yields every complete payload now available.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<FramedPayload> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        loop {
            // Cheap guard: a complete frame needs at least one LF or CR pair.
            if memchr::memchr2(b'\n', b'\r', &self.buffer).is_none() {
                break;
            }
            let Some(caps) = SSE_DATA_LINE_RE.captures(&self.buffer) else {
                break;
            };
            let payload = String::from_utf8_lossy(&caps[1]).into_owned();
            let consumed = caps.get(0).unwrap().end();
            let _ = self.buffer.split_to(consumed);
            payloads.push(FramedPayload {
                text: payload,
                buffered_remainder: false,
            });
        }
        payloads
    }

    /// Drains whatever the stream left behind.
    pub fn finish(&mut self) -> Option<FramedPayload> {
        if self.buffer.is_empty() {
            return None;
        }
        let remainder = self.buffer.split();
        Some(FramedPayload {
            text: String::from_utf8_lossy(&remainder).into_owned(),
            buffered_remainder: true,
        })
    }
}

// =================================================
// Stage 2: transformation
// =================================================

/// One unit of output: a transformed chunk, or raw text forwarded unchanged.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Chunk(ChatCompletionChunk),
    Raw(String),
}

/// Renders one item as an outgoing SSE frame.
pub fn render_openai_frame(item: &StreamItem) -> String {
    match item {
        StreamItem::Chunk(chunk) => format!(
            "data: {}{}",
            serde_json::to_string(chunk).unwrap_or_default(),
            SSE_DELIMITER
        ),
        StreamItem::Raw(text) => text.clone(),
    }
}

pub struct ChunkTransformer {
    id: String,
    model: String,
    mode: ThinkingMode,
    include_usage: bool,
    sent_role: HashMap<u32, bool>,
    tool_counters: HashMap<u32, u32>,
    saw_tool_calls: HashMap<u32, bool>,
    pending_finish: BTreeMap<u32, String>,
    usage: Option<Usage>,
}

impl ChunkTransformer {
    pub fn new(id: String, model: String, mode: ThinkingMode, include_usage: bool) -> Self {
        Self {
            id,
            model,
            mode,
            include_usage,
            sent_role: HashMap::new(),
            tool_counters: HashMap::new(),
            saw_tool_calls: HashMap::new(),
            pending_finish: BTreeMap::new(),
            usage: None,
        }
    }

    fn chunk_with(&self, choices: Vec<StreamChoice>, usage: Option<Usage>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: self.model.clone(),
            choices,
            usage,
        }
    }

    /// Transforms one framed payload. Undecodable payloads (bad JSON, no
    /// `candidates`) are forwarded raw so operators can see what upstream
    /// actually sent.
    pub fn transform(&mut self, payload: FramedPayload) -> Vec<StreamItem> {
        if payload.buffered_remainder {
            if payload.text.trim().is_empty() {
                return Vec::new();
            }
            return vec![StreamItem::Raw(payload.text)];
        }

        let parsed: Option<GeminiResponse> = serde_json::from_str(&payload.text).ok();
        let response = match parsed {
            Some(response) if response.candidates.is_some() => response,
            _ => {
                log::warn!("unparseable upstream stream payload: {}", payload.text);
                return vec![StreamItem::Raw(format!("{}{}", payload.text, SSE_DELIMITER))];
            }
        };

        if let Some(meta) = &response.usage_metadata {
            self.usage = Some(Usage {
                prompt_tokens: meta.prompt_token_count,
                completion_tokens: meta.candidates_token_count,
                total_tokens: meta.total_token_count,
            });
        }

        let mut items = Vec::new();
        for (i, candidate) in response.candidates.unwrap_or_default().iter().enumerate() {
            let index = candidate.index.unwrap_or(i as u32);

            if !self.sent_role.get(&index).copied().unwrap_or(false) {
                self.sent_role.insert(index, true);
                items.push(StreamItem::Chunk(self.chunk_with(
                    vec![StreamChoice {
                        index,
                        delta: Delta {
                            role: Some("assistant".to_string()),
                            content: Some(String::new()),
                            ..Default::default()
                        },
                        finish_reason: None,
                    }],
                    None,
                )));
            }

            let mut texts: Vec<&str> = Vec::new();
            let mut thoughts: Vec<&str> = Vec::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    if let Some(text) = &part.text {
                        if part.thought.unwrap_or(false) {
                            if !self.mode.is_refined() {
                                thoughts.push(text);
                            }
                        } else if !text.is_empty() {
                            texts.push(text);
                        }
                    }
                    if let Some(call) = &part.function_call {
                        let counter = self.tool_counters.entry(index).or_insert(0);
                        tool_calls.push(ToolCall {
                            id: Some(call.id.clone().unwrap_or_else(
                                crate::transform::response::synthesize_call_id,
                            )),
                            r#type: Some("function".to_string()),
                            function: FunctionCall {
                                name: Some(call.name.clone()),
                                arguments: Some(call.args.to_string()),
                            },
                            index: Some(*counter),
                        });
                        *counter += 1;
                        self.saw_tool_calls.insert(index, true);
                    }
                }
            }

            let delta = Delta {
                role: None,
                content: (!texts.is_empty()).then(|| texts.join(PART_SEPARATOR)),
                reasoning_content: (!thoughts.is_empty()).then(|| thoughts.join(PART_SEPARATOR)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            };
            if delta.content.is_some()
                || delta.reasoning_content.is_some()
                || delta.tool_calls.is_some()
            {
                items.push(StreamItem::Chunk(self.chunk_with(
                    vec![StreamChoice {
                        index,
                        delta,
                        finish_reason: None,
                    }],
                    None,
                )));
            }

            if let Some(reason) = &candidate.finish_reason {
                let mapped = if self.saw_tool_calls.get(&index).copied().unwrap_or(false) {
                    "tool_calls".to_string()
                } else {
                    map_finish_reason(reason)
                };
                self.pending_finish.insert(index, mapped);
            }
        }

        items
    }

    /// Emits the deferred final chunk per candidate. The terminating
    /// `data: [DONE]` frame is appended by the caller after these.
    pub fn flush(&mut self) -> Vec<StreamItem> {
        let pending = std::mem::take(&mut self.pending_finish);
        pending
            .into_iter()
            .map(|(index, reason)| {
                let usage = self.include_usage.then_some(self.usage).flatten();
                StreamItem::Chunk(self.chunk_with(
                    vec![StreamChoice {
                        index,
                        delta: Delta::default(),
                        finish_reason: Some(reason),
                    }],
                    usage,
                ))
            })
            .collect()
    }
}

/// Convenience used by the handler and tests: the literal stream terminator.
pub fn done_frame() -> String {
    SSE_DONE_FRAME.to_string()
}

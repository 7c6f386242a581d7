//! OpenAI-shape responses → Anthropic Messages dialect, plain and streaming.

use crate::sse::Event;
use crate::transform::stream::StreamItem;
use crate::types::claude::{
    ClaudeContentBlock, ClaudeErrorEnvelope, ClaudeResponse, ClaudeUsage,
};
use crate::types::openai::{ChatCompletionResponse, Delta, Usage};
use serde_json::{json, Value};

/// OpenAI finish reason → Anthropic stop reason.
pub fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        _ => "end_turn",
    }
}

/// Converts a non-streaming chat completion into an Anthropic message.
pub fn to_claude_response(response: ChatCompletionResponse) -> ClaudeResponse {
    let mut content: Vec<ClaudeContentBlock> = Vec::new();
    let mut stop_reason = None;
    let usage = response.usage.unwrap_or_default();

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content.push(ClaudeContentBlock::Text { text });
            }
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let input: Value = call
                .function
                .arguments
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_else(|| json!({}));
            content.push(ClaudeContentBlock::ToolUse {
                id: call.id.unwrap_or_default(),
                name: call.function.name.unwrap_or_default(),
                input,
            });
        }
        stop_reason = choice.finish_reason.as_deref().map(|r| map_stop_reason(r).to_string());
    }

    ClaudeResponse {
        id: response.id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: response.model,
        stop_reason,
        stop_sequence: None,
        usage: ClaudeUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    }
}

/// Which content block is currently open on the Anthropic stream.
#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenBlock {
    None,
    Text,
    Thinking,
    ToolUse,
}

/// Rewrites the internal OpenAI chunk stream into Anthropic stream events:
/// `message_start`, `content_block_start/delta/stop`, `message_delta`,
/// `message_stop`.
pub struct ClaudeStreamRewriter {
    model: String,
    message_id: String,
    started: bool,
    block_index: u32,
    open_block: OpenBlock,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

impl ClaudeStreamRewriter {
    pub fn new(message_id: String, model: String) -> Self {
        Self {
            model,
            message_id,
            started: false,
            block_index: 0,
            open_block: OpenBlock::None,
            stop_reason: None,
            usage: None,
        }
    }

    fn frame(name: &str, data: Value) -> String {
        Event::default().event(name).data(data.to_string()).to_string()
    }

    fn message_start(&self) -> String {
        Self::frame(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": { "input_tokens": 0, "output_tokens": 0 }
                }
            }),
        )
    }

    fn close_block(&mut self, frames: &mut Vec<String>) {
        if self.open_block != OpenBlock::None {
            frames.push(Self::frame(
                "content_block_stop",
                json!({ "type": "content_block_stop", "index": self.block_index }),
            ));
            self.block_index += 1;
            self.open_block = OpenBlock::None;
        }
    }

    fn ensure_block(&mut self, wanted: OpenBlock, start: Value, frames: &mut Vec<String>) {
        if self.open_block == wanted {
            return;
        }
        self.close_block(frames);
        frames.push(Self::frame(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": start
            }),
        ));
        self.open_block = wanted;
    }

    fn on_delta(&mut self, delta: &Delta, frames: &mut Vec<String>) {
        if let Some(reasoning) = &delta.reasoning_content {
            self.ensure_block(
                OpenBlock::Thinking,
                json!({ "type": "thinking", "thinking": "" }),
                frames,
            );
            frames.push(Self::frame(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": { "type": "thinking_delta", "thinking": reasoning }
                }),
            ));
        }

        if let Some(content) = &delta.content {
            if !content.is_empty() {
                self.ensure_block(
                    OpenBlock::Text,
                    json!({ "type": "text", "text": "" }),
                    frames,
                );
                frames.push(Self::frame(
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": self.block_index,
                        "delta": { "type": "text_delta", "text": content }
                    }),
                ));
            }
        }

        for call in delta.tool_calls.as_deref().unwrap_or_default() {
            // a named call opens a fresh tool_use block; bare argument
            // fragments continue the open one
            if let Some(name) = call.function.name.as_deref() {
                self.close_block(frames);
                frames.push(Self::frame(
                    "content_block_start",
                    json!({
                        "type": "content_block_start",
                        "index": self.block_index,
                        "content_block": {
                            "type": "tool_use",
                            "id": call.id.clone().unwrap_or_default(),
                            "name": name,
                            "input": {}
                        }
                    }),
                ));
                self.open_block = OpenBlock::ToolUse;
            }
            if let Some(arguments) = call.function.arguments.as_deref() {
                if !arguments.is_empty() {
                    frames.push(Self::frame(
                        "content_block_delta",
                        json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": { "type": "input_json_delta", "partial_json": arguments }
                        }),
                    ));
                }
            }
        }
    }

    /// Consumes one internal stream item and returns the Anthropic frames it
    /// produces.
    pub fn on_item(&mut self, item: &StreamItem) -> Vec<String> {
        let mut frames = Vec::new();
        match item {
            StreamItem::Chunk(chunk) => {
                if !self.started {
                    self.started = true;
                    frames.push(self.message_start());
                }
                if let Some(usage) = chunk.usage {
                    self.usage = Some(usage);
                }
                for choice in &chunk.choices {
                    if let Some(reason) = &choice.finish_reason {
                        self.stop_reason = Some(map_stop_reason(reason).to_string());
                    }
                    self.on_delta(&choice.delta, &mut frames);
                }
            }
            StreamItem::Raw(raw) => {
                // upstream handed us something undecodable; surface it as an
                // Anthropic error event rather than leaking a foreign frame
                let envelope =
                    ClaudeErrorEnvelope::new("upstream_error", raw.trim().to_string());
                frames.push(
                    Event::default()
                        .event("error")
                        .data(serde_json::to_string(&envelope).unwrap_or_default())
                        .to_string(),
                );
            }
        }
        frames
    }

    /// Closes the stream: the last `content_block_stop`, `message_delta`
    /// with the stop reason and usage, and `message_stop`.
    pub fn finish(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        if !self.started {
            frames.push(self.message_start());
            self.started = true;
        }
        self.close_block(&mut frames);
        let usage = self.usage.unwrap_or_default();
        frames.push(Self::frame(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": self.stop_reason.clone().unwrap_or_else(|| "end_turn".to_string()),
                    "stop_sequence": null
                },
                "usage": {
                    "input_tokens": usage.prompt_tokens,
                    "output_tokens": usage.completion_tokens
                }
            }),
        ));
        frames.push(Self::frame("message_stop", json!({ "type": "message_stop" })));
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::openai::{
        ChatChoice, ChatCompletionChunk, FunctionCall, ResponseMessage, StreamChoice, ToolCall,
    };

    fn chunk(choices: Vec<StreamChoice>, usage: Option<Usage>) -> StreamItem {
        StreamItem::Chunk(ChatCompletionChunk {
            id: "chatcmpl-x".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "gemini-2.0-flash".to_string(),
            choices,
            usage,
        })
    }

    fn text_delta(content: &str) -> StreamChoice {
        StreamChoice {
            index: 0,
            delta: Delta {
                content: Some(content.to_string()),
                ..Default::default()
            },
            finish_reason: None,
        }
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason("stop"), "end_turn");
        assert_eq!(map_stop_reason("length"), "max_tokens");
        assert_eq!(map_stop_reason("tool_calls"), "tool_use");
        assert_eq!(map_stop_reason("content_filter"), "end_turn");
    }

    #[test]
    fn non_stream_response_with_tool_call() {
        let response = ChatCompletionResponse {
            id: "chatcmpl-x".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gemini-2.0-flash".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: Some("checking".to_string()),
                    reasoning_content: None,
                    tool_calls: Some(vec![ToolCall {
                        id: Some("call_1".to_string()),
                        r#type: Some("function".to_string()),
                        function: FunctionCall {
                            name: Some("get_weather".to_string()),
                            arguments: Some("{\"city\":\"Berlin\"}".to_string()),
                        },
                        index: None,
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            usage: Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 4,
                total_tokens: 7,
            }),
        };
        let claude = to_claude_response(response);
        assert_eq!(claude.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(claude.content.len(), 2);
        assert!(matches!(
            claude.content[1],
            ClaudeContentBlock::ToolUse { ref name, .. } if name == "get_weather"
        ));
        assert_eq!(claude.usage.output_tokens, 4);
    }

    #[test]
    fn stream_rewriting_produces_anthropic_event_sequence() {
        let mut rewriter =
            ClaudeStreamRewriter::new("msg_1".to_string(), "gemini-2.0-flash".to_string());
        let mut frames = Vec::new();
        frames.extend(rewriter.on_item(&chunk(
            vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: Some("assistant".to_string()),
                    content: Some(String::new()),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            None,
        )));
        frames.extend(rewriter.on_item(&chunk(vec![text_delta("Hi")], None)));
        frames.extend(rewriter.on_item(&chunk(
            vec![StreamChoice {
                index: 0,
                delta: Delta::default(),
                finish_reason: Some("stop".to_string()),
            }],
            None,
        )));
        frames.extend(rewriter.finish());

        let joined = frames.join("");
        let order = [
            "event: message_start",
            "event: content_block_start",
            "event: content_block_delta",
            "event: content_block_stop",
            "event: message_delta",
            "event: message_stop",
        ];
        let mut cursor = 0;
        for marker in order {
            let at = joined[cursor..]
                .find(marker)
                .unwrap_or_else(|| panic!("missing {}", marker));
            cursor += at;
        }
        assert!(joined.contains("\"text_delta\""));
        assert!(joined.contains("\"stop_reason\":\"end_turn\""));
    }

    #[test]
    fn tool_call_stream_opens_tool_use_block() {
        let mut rewriter =
            ClaudeStreamRewriter::new("msg_1".to_string(), "gemini-2.0-flash".to_string());
        let mut frames = Vec::new();
        frames.extend(rewriter.on_item(&chunk(
            vec![StreamChoice {
                index: 0,
                delta: Delta {
                    tool_calls: Some(vec![ToolCall {
                        id: Some("call_9".to_string()),
                        r#type: Some("function".to_string()),
                        function: FunctionCall {
                            name: Some("lookup".to_string()),
                            arguments: Some("{\"q\":1}".to_string()),
                        },
                        index: Some(0),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            None,
        )));
        frames.extend(rewriter.finish());
        let joined = frames.join("");
        assert!(joined.contains("\"tool_use\""));
        assert!(joined.contains("\"input_json_delta\""));
        assert!(joined.contains("\"partial_json\":\"{\\\"q\\\":1}\""));
    }

    #[test]
    fn raw_items_become_error_events() {
        let mut rewriter = ClaudeStreamRewriter::new("msg_1".to_string(), "m".to_string());
        let frames = rewriter.on_item(&StreamItem::Raw("boom\n\n".to_string()));
        assert!(frames[0].starts_with("event: error\n"));
        assert!(frames[0].contains("upstream_error"));
    }
}

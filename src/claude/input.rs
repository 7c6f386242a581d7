//! Anthropic Messages request → OpenAI-shape chat request.

use crate::error::{GatewayError, ProxyResult};
use crate::types::claude::{
    ClaudeContentBlock, ClaudeMessage, ClaudeRequest, ClaudeToolChoice,
};
use crate::types::openai::{
    ChatMessage, ChatRequest, ContentPart, FunctionCall, FunctionDefinition, FunctionName,
    ImageUrl, MessageContent, StopSequences, Tool, ToolCall, ToolChoice, ToolChoiceFunction,
};

/// Converts a full Anthropic request. The top-level `system` prompt becomes a
/// leading system message; `tool_result` blocks inside user messages become
/// standalone tool messages, ordered before the remaining user content the
/// way the chat dialect expects them.
pub fn from_claude(request: ClaudeRequest) -> ProxyResult<ChatRequest> {
    let mut messages: Vec<ChatMessage> = Vec::new();

    if let Some(system) = &request.system {
        let trimmed = system.trim();
        if !trimmed.is_empty() {
            messages.push(ChatMessage::text("system", trimmed));
        }
    }

    for message in &request.messages {
        match message.role.as_str() {
            "user" => convert_user_message(message, &mut messages)?,
            "assistant" => messages.push(convert_assistant_message(message)?),
            other => {
                return Err(GatewayError::InvalidRequest(format!(
                    "unknown message role in messages array: {}",
                    other
                )))
            }
        }
    }

    Ok(ChatRequest {
        model: request.model.clone(),
        messages,
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        max_tokens: request.max_tokens,
        stop: request
            .stop_sequences
            .clone()
            .map(StopSequences::Many),
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| Tool {
                    r#type: "function".to_string(),
                    function: FunctionDefinition {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: Some(tool.input_schema.clone()),
                    },
                })
                .collect()
        }),
        tool_choice: request.tool_choice.as_ref().map(|choice| match choice {
            ClaudeToolChoice::Auto => ToolChoice::Mode("auto".to_string()),
            ClaudeToolChoice::Any => ToolChoice::Mode("required".to_string()),
            ClaudeToolChoice::None => ToolChoice::Mode("none".to_string()),
            ClaudeToolChoice::Tool { name } => ToolChoice::Function(ToolChoiceFunction {
                r#type: "function".to_string(),
                function: FunctionName { name: name.clone() },
            }),
        }),
        ..Default::default()
    })
}

fn convert_user_message(
    message: &ClaudeMessage,
    messages: &mut Vec<ChatMessage>,
) -> ProxyResult<()> {
    let mut parts: Vec<ContentPart> = Vec::new();

    for block in &message.content {
        match block {
            ClaudeContentBlock::Text { text } => {
                parts.push(ContentPart::Text { text: text.clone() });
            }
            ClaudeContentBlock::Image { source } => {
                let url = match source.source_type.as_str() {
                    "base64" => {
                        let media_type = source
                            .media_type
                            .as_deref()
                            .unwrap_or("image/jpeg");
                        let data = source.data.as_deref().ok_or_else(|| {
                            GatewayError::InvalidRequest(
                                "base64 image source is missing data".to_string(),
                            )
                        })?;
                        format!("data:{};base64,{}", media_type, data)
                    }
                    "url" => source
                        .url
                        .clone()
                        .ok_or_else(|| {
                            GatewayError::InvalidRequest(
                                "url image source is missing url".to_string(),
                            )
                        })?,
                    other => {
                        return Err(GatewayError::InvalidRequest(format!(
                            "unknown image source type: {}",
                            other
                        )))
                    }
                };
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl { url, detail: None },
                });
            }
            ClaudeContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(MessageContent::Text(content.clone())),
                    tool_call_id: Some(tool_use_id.clone()),
                    ..Default::default()
                });
            }
            ClaudeContentBlock::ToolUse { .. } => {
                return Err(GatewayError::InvalidRequest(
                    "tool_use blocks belong to assistant messages".to_string(),
                ))
            }
        }
    }

    if !parts.is_empty() {
        // single text blocks collapse to the plain-string shape
        let content = match parts.as_slice() {
            [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
            _ => MessageContent::Parts(parts),
        };
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(content),
            ..Default::default()
        });
    }
    Ok(())
}

fn convert_assistant_message(message: &ClaudeMessage) -> ProxyResult<ChatMessage> {
    let mut texts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &message.content {
        match block {
            ClaudeContentBlock::Text { text } => texts.push(text),
            ClaudeContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id: Some(id.clone()),
                    r#type: Some("function".to_string()),
                    function: FunctionCall {
                        name: Some(name.clone()),
                        arguments: Some(input.to_string()),
                    },
                    index: None,
                });
            }
            ClaudeContentBlock::Image { .. } => {
                return Err(GatewayError::InvalidRequest(
                    "assistant messages cannot carry images".to_string(),
                ))
            }
            ClaudeContentBlock::ToolResult { .. } => {
                return Err(GatewayError::InvalidRequest(
                    "tool_result blocks belong to user messages".to_string(),
                ))
            }
        }
    }

    Ok(ChatMessage {
        role: "assistant".to_string(),
        content: (!texts.is_empty()).then(|| MessageContent::Text(texts.join("\n"))),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        ..Default::default()
    })
}

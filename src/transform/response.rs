//! Gemini response → OpenAI response, for non-streaming chat and embeddings.

use crate::transform::model_tag::ThinkingMode;
use crate::types::constants::{map_finish_reason, PART_SEPARATOR, THINKING_TAG_RE};
use crate::types::gemini::{
    GeminiCandidate, GeminiEmbedResponse, GeminiPromptFeedback, GeminiResponse,
    GeminiUsageMetadata,
};
use crate::types::openai::{
    ChatChoice, ChatCompletionResponse, EmbeddingObject, EmbeddingsResponse, EmbeddingsUsage,
    FunctionCall, ResponseMessage, ToolCall, Usage,
};

/// Synthesizes an OpenAI-style tool-call id for calls Gemini returned
/// without one.
pub fn synthesize_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Removes `<thinking>…</thinking>` spans; used in refined mode.
pub fn strip_thinking_tags(content: &str) -> String {
    THINKING_TAG_RE.replace_all(content, "").to_string()
}

/// Converts one candidate into an OpenAI choice. Text parts join with the
/// content separator; functionCall parts become tool_calls and force the
/// finish reason to `tool_calls`.
pub fn transform_candidates(
    candidate: &GeminiCandidate,
    fallback_index: u32,
    mode: ThinkingMode,
) -> ChatChoice {
    let mut texts: Vec<&str> = Vec::new();
    let mut thoughts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    if let Some(content) = &candidate.content {
        for part in &content.parts {
            if let Some(text) = &part.text {
                if part.thought.unwrap_or(false) {
                    thoughts.push(text);
                } else {
                    texts.push(text);
                }
            }
            if let Some(call) = &part.function_call {
                tool_calls.push(ToolCall {
                    id: Some(call.id.clone().unwrap_or_else(synthesize_call_id)),
                    r#type: Some("function".to_string()),
                    function: FunctionCall {
                        name: Some(call.name.clone()),
                        arguments: Some(call.args.to_string()),
                    },
                    index: None,
                });
            }
        }
    }

    let mut content = (!texts.is_empty()).then(|| texts.join(PART_SEPARATOR));
    if mode.is_refined() {
        content = content.map(|text| strip_thinking_tags(&text));
        thoughts.clear();
    }

    let finish_reason = if !tool_calls.is_empty() {
        Some("tool_calls".to_string())
    } else {
        candidate.finish_reason.as_deref().map(map_finish_reason)
    };

    ChatChoice {
        index: candidate.index.unwrap_or(fallback_index),
        message: ResponseMessage {
            role: "assistant".to_string(),
            content,
            reasoning_content: (!thoughts.is_empty()).then(|| thoughts.join("\n\n")),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        },
        finish_reason,
    }
}

/// Token accounting with zero defaults.
pub fn transform_usage(metadata: Option<&GeminiUsageMetadata>) -> Usage {
    match metadata {
        Some(meta) => Usage {
            prompt_tokens: meta.prompt_token_count,
            completion_tokens: meta.candidates_token_count,
            total_tokens: meta.total_token_count,
        },
        None => Usage::default(),
    }
}

/// When the prompt itself was blocked, Gemini returns no candidates; clients
/// still expect one choice explaining the refusal.
pub fn check_prompt_block(choices: &mut Vec<ChatChoice>, feedback: Option<&GeminiPromptFeedback>) {
    if !choices.is_empty() {
        return;
    }
    if let Some(reason) = feedback.and_then(|f| f.block_reason.as_deref()) {
        log::warn!("prompt blocked upstream: {}", reason);
        choices.push(ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: None,
                reasoning_content: None,
                tool_calls: None,
            },
            finish_reason: Some("content_filter".to_string()),
        });
    }
}

/// Assembles the full non-streaming chat completion object.
pub fn process_completions_response(
    response: GeminiResponse,
    model: &str,
    id: &str,
    mode: ThinkingMode,
) -> ChatCompletionResponse {
    let mut choices: Vec<ChatChoice> = response
        .candidates
        .as_deref()
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, candidate)| transform_candidates(candidate, i as u32, mode))
        .collect();
    check_prompt_block(&mut choices, response.prompt_feedback.as_ref());

    ChatCompletionResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: response
            .model_version
            .unwrap_or_else(|| model.to_string()),
        choices,
        usage: Some(transform_usage(response.usage_metadata.as_ref())),
    }
}

/// Maps single or batched Gemini embeddings onto the OpenAI list shape.
pub fn process_embeddings_response(
    response: GeminiEmbedResponse,
    model: &str,
) -> EmbeddingsResponse {
    let vectors: Vec<Vec<f64>> = match (response.embedding, response.embeddings) {
        (Some(single), _) => vec![single.values],
        (None, Some(many)) => many.into_iter().map(|e| e.values).collect(),
        (None, None) => vec![],
    };

    EmbeddingsResponse {
        object: "list".to_string(),
        data: vectors
            .into_iter()
            .enumerate()
            .map(|(index, embedding)| EmbeddingObject {
                object: "embedding".to_string(),
                embedding,
                index,
            })
            .collect(),
        model: model.to_string(),
        usage: EmbeddingsUsage::default(),
    }
}

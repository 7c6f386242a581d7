//! OpenAI-shape request → Gemini request.
//!
//! The transformer owns the awkward parts of the translation: multimodal
//! content (data URLs are decoded in place, remote image URLs are fetched),
//! tool-call bookkeeping so tool responses land in the right slot of the
//! right model turn, and the generation-config field mapping including
//! thinking budgets and response formats.

use crate::error::{GatewayError, ProxyResult};
use crate::transform::model_tag::ModelTag;
use crate::types::constants::{default_safety_settings, effort_budget};
use crate::types::gemini::{
    GeminiContent, GeminiFunctionCall, GeminiFunctionCallingConfig, GeminiFunctionDeclaration,
    GeminiFunctionResponse, GeminiGenerationConfig, GeminiPart, GeminiRequest, GeminiToolConfig,
    GeminiTool,
};
use crate::types::openai::{
    ChatMessage, ChatRequest, ContentPart, MessageContent, ToolChoice,
};
use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;

lazy_static! {
    static ref DATA_URL_RE: Regex =
        Regex::new(r"^data:(?P<mime>[^;,]+);base64,(?P<data>.+)$").unwrap();
}

/// Ids starting with this prefix were synthesized by the gateway and are not
/// forwarded upstream.
const SYNTHESIZED_ID_PREFIX: &str = "call_";

/// Builds the complete upstream request body.
pub async fn build_gemini_request(
    client: &reqwest::Client,
    request: &ChatRequest,
    tag: &ModelTag,
) -> ProxyResult<GeminiRequest> {
    request.validate().map_err(GatewayError::InvalidRequest)?;

    let (system_instruction, mut contents) =
        transform_messages(client, &request.messages).await?;

    // Gemini rejects a system instruction when the conversation does not
    // open with a user turn.
    if system_instruction.is_some()
        && contents.first().map(|c| c.role.as_str()) != Some("user")
    {
        contents.insert(
            0,
            GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::text(" ")],
            },
        );
    }

    let (tools, tool_config) = transform_tools(request, tag.search)?;
    let generation_config = transform_config(request, tag.thinking_config())?;

    Ok(GeminiRequest {
        system_instruction,
        contents,
        safety_settings: default_safety_settings(),
        generation_config: Some(generation_config),
        tools,
        tool_config,
    })
}

/// Maps sampling controls, response format and thinking configuration onto
/// `generationConfig`. The explicit `thinking` argument (from the model-name
/// suffix) is merged last and wins over `reasoning_effort`.
pub fn transform_config(
    request: &ChatRequest,
    thinking: Option<crate::types::gemini::GeminiThinkingConfig>,
) -> ProxyResult<GeminiGenerationConfig> {
    let mut config = GeminiGenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        max_output_tokens: request.completion_token_limit(),
        candidate_count: request.n,
        seed: request.seed,
        stop_sequences: request.stop.clone().map(|stop| stop.into_vec()),
        presence_penalty: request.presence_penalty,
        frequency_penalty: request.frequency_penalty,
        ..Default::default()
    };

    if let Some(effort) = request.reasoning_effort.as_deref() {
        let budget = effort_budget(effort).ok_or_else(|| {
            GatewayError::InvalidRequest(format!("unknown reasoning_effort: {}", effort))
        })?;
        config.thinking_config = Some(crate::types::gemini::GeminiThinkingConfig {
            thinking_budget: budget,
            include_thoughts: false,
        });
    }
    if thinking.is_some() {
        config.thinking_config = thinking;
    }

    if let Some(format) = &request.response_format {
        match format.format_type.as_str() {
            "json_schema" => {
                let schema = format
                    .json_schema
                    .as_ref()
                    .and_then(|s| s.schema.clone())
                    .ok_or_else(|| {
                        GatewayError::InvalidRequest(
                            "response_format json_schema requires a schema".to_string(),
                        )
                    })?;
                config.response_mime_type = Some(if schema.get("enum").is_some() {
                    "text/x.enum".to_string()
                } else {
                    "application/json".to_string()
                });
                config.response_schema = Some(schema);
            }
            "json_object" => {
                config.response_mime_type = Some("application/json".to_string());
            }
            "text" => {
                config.response_mime_type = Some("text/plain".to_string());
            }
            other => {
                return Err(GatewayError::InvalidRequest(format!(
                    "unknown response_format type: {}",
                    other
                )))
            }
        }
    }

    Ok(config)
}

/// Converts one message's content into Gemini parts. Remote image URLs are
/// fetched through the shared client; data URLs are decoded in place.
pub async fn transform_msg(
    client: &reqwest::Client,
    content: &MessageContent,
) -> ProxyResult<Vec<GeminiPart>> {
    let parts_in = match content {
        MessageContent::Text(text) => return Ok(vec![GeminiPart::text(text.clone())]),
        MessageContent::Parts(parts) => parts,
    };

    let mut parts = Vec::with_capacity(parts_in.len());
    let mut has_text = false;
    for part in parts_in {
        match part {
            ContentPart::Text { text } => {
                has_text = true;
                parts.push(GeminiPart::text(text.clone()));
            }
            ContentPart::ImageUrl { image_url } => {
                parts.push(image_part(client, &image_url.url).await?);
            }
            ContentPart::InputAudio { input_audio } => {
                parts.push(GeminiPart::inline_data(
                    format!("audio/{}", input_audio.format),
                    input_audio.data.clone(),
                ));
            }
        }
    }

    // Gemini requires at least one text part alongside inline media.
    if !parts.is_empty() && !has_text {
        parts.push(GeminiPart::text(""));
    }
    Ok(parts)
}

async fn image_part(client: &reqwest::Client, url: &str) -> ProxyResult<GeminiPart> {
    if let Some(caps) = DATA_URL_RE.captures(url) {
        return Ok(GeminiPart::inline_data(&caps["mime"], &caps["data"]));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        let response = client.get(url).send().await.map_err(|e| {
            GatewayError::InvalidRequest(format!("failed to fetch image url: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(GatewayError::InvalidRequest(format!(
                "image url returned status {}",
                response.status()
            )));
        }
        let mime = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());
        let bytes = response.bytes().await.map_err(|e| {
            GatewayError::InvalidRequest(format!("failed to read image url: {}", e))
        })?;
        return Ok(GeminiPart::inline_data(
            mime,
            base64::engine::general_purpose::STANDARD.encode(&bytes),
        ));
    }
    Err(GatewayError::InvalidRequest(format!(
        "unsupported image url: {}",
        url
    )))
}

// Tool calls of the assistant turn currently in scope, keyed by id; the
// value is the slot the matching response must occupy and the function name.
#[derive(Default)]
struct AssistantCalls {
    slots: HashMap<String, (usize, String)>,
    count: usize,
}

/// Converts the message history. System messages collapse into
/// `system_instruction`; assistant turns become `model` turns; tool messages
/// become a single `function` turn placed by `tool_call_id` lookup.
pub async fn transform_messages(
    client: &reqwest::Client,
    messages: &[ChatMessage],
) -> ProxyResult<(Option<GeminiContent>, Vec<GeminiContent>)> {
    let mut system_texts: Vec<String> = Vec::new();
    let mut contents: Vec<GeminiContent> = Vec::new();
    let mut calls = AssistantCalls::default();
    let mut pending_responses: Vec<Option<GeminiPart>> = Vec::new();

    for message in messages {
        if message.role != "tool" && !pending_responses.is_empty() {
            contents.push(flush_function_turn(&mut pending_responses));
        }

        match message.role.as_str() {
            "system" => {
                if let Some(content) = &message.content {
                    system_texts.push(content.as_text());
                }
            }
            "user" => {
                let parts = match &message.content {
                    Some(content) => transform_msg(client, content).await?,
                    None => vec![],
                };
                if !parts.is_empty() {
                    contents.push(GeminiContent {
                        role: "user".to_string(),
                        parts,
                    });
                }
            }
            "assistant" => {
                calls = AssistantCalls::default();
                let mut parts = match &message.content {
                    Some(content) => transform_msg(client, content).await?,
                    None => vec![],
                };
                if let Some(tool_calls) = &message.tool_calls {
                    for (slot, call) in tool_calls.iter().enumerate() {
                        let id = call.id.clone().ok_or_else(|| {
                            GatewayError::InvalidRequest(
                                "assistant tool_call is missing an id".to_string(),
                            )
                        })?;
                        let name = call.function.name.clone().ok_or_else(|| {
                            GatewayError::InvalidRequest(
                                "assistant tool_call is missing a function name".to_string(),
                            )
                        })?;
                        let args: Value = match call.function.arguments.as_deref() {
                            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)
                                .unwrap_or_else(|_| Value::String(raw.to_string())),
                            _ => json!({}),
                        };
                        parts.push(GeminiPart {
                            function_call: Some(GeminiFunctionCall {
                                // Synthesized ids stay on our side of the fence.
                                id: (!id.starts_with(SYNTHESIZED_ID_PREFIX))
                                    .then(|| id.clone()),
                                name: name.clone(),
                                args,
                            }),
                            ..Default::default()
                        });
                        calls.slots.insert(id, (slot, name));
                    }
                    calls.count = tool_calls.len();
                    pending_responses = vec![None; calls.count];
                }
                if !parts.is_empty() {
                    contents.push(GeminiContent {
                        role: "model".to_string(),
                        parts,
                    });
                }
            }
            "tool" => {
                let id = message.tool_call_id.as_deref().ok_or_else(|| {
                    GatewayError::InvalidRequest("tool message is missing tool_call_id".to_string())
                })?;
                let (slot, name) = calls.slots.get(id).cloned().ok_or_else(|| {
                    GatewayError::InvalidRequest(format!(
                        "tool message references unknown tool_call_id: {}",
                        id
                    ))
                })?;
                if pending_responses
                    .get(slot)
                    .map(|entry| entry.is_some())
                    .unwrap_or(true)
                {
                    return Err(GatewayError::InvalidRequest(format!(
                        "duplicate tool response for tool_call_id: {}",
                        id
                    )));
                }
                let text = message
                    .content
                    .as_ref()
                    .map(MessageContent::as_text)
                    .unwrap_or_default();
                let response = serde_json::from_str::<Value>(&text)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({ "result": text }));
                pending_responses[slot] = Some(GeminiPart {
                    function_response: Some(GeminiFunctionResponse { name, response }),
                    ..Default::default()
                });
            }
            other => {
                return Err(GatewayError::InvalidRequest(format!(
                    "unknown message role: {}",
                    other
                )))
            }
        }
    }

    if !pending_responses.is_empty() {
        contents.push(flush_function_turn(&mut pending_responses));
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(GeminiContent {
            role: "system".to_string(),
            parts: vec![GeminiPart::text(system_texts.join("\n\n"))],
        })
    };

    Ok((system_instruction, contents))
}

fn flush_function_turn(pending: &mut Vec<Option<GeminiPart>>) -> GeminiContent {
    let parts = pending.drain(..).flatten().collect();
    GeminiContent {
        role: "function".to_string(),
        parts,
    }
}

/// Maps the tool declarations and tool_choice. Only `function` tools are
/// accepted; other types are dropped. The search decoration adds the
/// built-in `google_search` tool.
pub fn transform_tools(
    request: &ChatRequest,
    search: bool,
) -> ProxyResult<(Option<Vec<GeminiTool>>, Option<GeminiToolConfig>)> {
    let mut tools: Vec<GeminiTool> = Vec::new();

    if let Some(declared) = &request.tools {
        let declarations: Vec<GeminiFunctionDeclaration> = declared
            .iter()
            .filter(|tool| tool.r#type == "function")
            .map(|tool| GeminiFunctionDeclaration {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                parameters: tool.function.parameters.clone(),
            })
            .collect();
        if !declarations.is_empty() {
            tools.push(GeminiTool {
                function_declarations: Some(declarations),
                google_search: None,
            });
        }
    }

    if search {
        tools.push(GeminiTool {
            function_declarations: None,
            google_search: Some(json!({})),
        });
    }

    let tool_config = match &request.tool_choice {
        Some(ToolChoice::Mode(mode)) => match mode.as_str() {
            "auto" | "none" | "required" => Some(GeminiToolConfig {
                function_calling_config: GeminiFunctionCallingConfig {
                    mode: mode.to_uppercase(),
                    allowed_function_names: None,
                },
            }),
            other => {
                return Err(GatewayError::InvalidRequest(format!(
                    "unknown tool_choice: {}",
                    other
                )))
            }
        },
        Some(ToolChoice::Function(choice)) => Some(GeminiToolConfig {
            function_calling_config: GeminiFunctionCallingConfig {
                mode: "ANY".to_string(),
                allowed_function_names: Some(vec![choice.function.name.clone()]),
            },
        }),
        None => None,
    };

    Ok(((!tools.is_empty()).then_some(tools), tool_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::model_tag::parse_model_name;
    use serde_json::json;

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    fn chat_request(value: Value) -> ChatRequest {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn simple_round_trip() {
        let request = chat_request(json!({
            "model": "gemini-2.0-flash",
            "messages": [ { "role": "user", "content": "hi" } ],
            "temperature": 0.7
        }));
        let tag = parse_model_name("gemini-2.0-flash");
        let gemini = build_gemini_request(&client(), &request, &tag).await.unwrap();
        assert_eq!(gemini.contents[0].role, "user");
        assert_eq!(gemini.contents[0].parts[0].text.as_deref(), Some("hi"));
        assert_eq!(
            gemini.generation_config.as_ref().unwrap().temperature,
            Some(0.7)
        );
        assert_eq!(gemini.safety_settings.len(), 5);
    }

    #[tokio::test]
    async fn roles_map_and_system_moves_out() {
        let request = chat_request(json!({
            "messages": [
                { "role": "system", "content": "be brief" },
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": "hello" },
                { "role": "user", "content": "bye" }
            ]
        }));
        let tag = parse_model_name("gemini-2.0-flash");
        let gemini = build_gemini_request(&client(), &request, &tag).await.unwrap();
        assert!(gemini.system_instruction.is_some());
        let roles: Vec<&str> = gemini.contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert!(roles.iter().all(|r| ["user", "model", "function"].contains(r)));
    }

    #[tokio::test]
    async fn system_with_leading_assistant_injects_user_turn() {
        let request = chat_request(json!({
            "messages": [
                { "role": "system", "content": "be brief" },
                { "role": "assistant", "content": "hello" }
            ]
        }));
        let tag = parse_model_name("gemini-2.0-flash");
        let gemini = build_gemini_request(&client(), &request, &tag).await.unwrap();
        assert_eq!(gemini.contents[0].role, "user");
        assert_eq!(gemini.contents[0].parts[0].text.as_deref(), Some(" "));
        assert_eq!(gemini.contents[1].role, "model");
    }

    #[tokio::test]
    async fn data_url_image_becomes_inline_data() {
        let request = chat_request(json!({
            "messages": [ { "role": "user", "content": [
                { "type": "image_url", "image_url": { "url": "data:image/png;base64,QUJD" } }
            ]}]
        }));
        let parts = transform_msg(&client(), request.messages[0].content.as_ref().unwrap())
            .await
            .unwrap();
        // image plus the mandatory empty text part
        assert_eq!(parts.len(), 2);
        let inline = parts[0].inline_data.as_ref().unwrap();
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "QUJD");
        assert_eq!(parts[1].text.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn input_audio_maps_to_audio_mime() {
        let request = chat_request(json!({
            "messages": [ { "role": "user", "content": [
                { "type": "text", "text": "transcribe" },
                { "type": "input_audio", "input_audio": { "data": "QUJD", "format": "wav" } }
            ]}]
        }));
        let parts = transform_msg(&client(), request.messages[0].content.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[1].inline_data.as_ref().unwrap().mime_type,
            "audio/wav"
        );
    }

    #[tokio::test]
    async fn tool_round_trip_places_responses_by_id() {
        let request = chat_request(json!({
            "messages": [
                { "role": "user", "content": "weather in Berlin and Paris" },
                { "role": "assistant", "tool_calls": [
                    { "id": "call_1", "type": "function",
                      "function": { "name": "get_weather", "arguments": "{\"city\":\"Berlin\"}" } },
                    { "id": "srv_2", "type": "function",
                      "function": { "name": "get_weather", "arguments": "{\"city\":\"Paris\"}" } }
                ]},
                { "role": "tool", "tool_call_id": "srv_2", "content": "rainy" },
                { "role": "tool", "tool_call_id": "call_1", "content": "sunny" }
            ]
        }));
        let (_, contents) = transform_messages(&client(), &request.messages).await.unwrap();
        assert_eq!(contents.len(), 3);

        let model_turn = &contents[1];
        assert_eq!(model_turn.role, "model");
        let first_call = model_turn.parts[0].function_call.as_ref().unwrap();
        // synthesized "call_" ids are not forwarded, provider ids round-trip
        assert!(first_call.id.is_none());
        let second_call = model_turn.parts[1].function_call.as_ref().unwrap();
        assert_eq!(second_call.id.as_deref(), Some("srv_2"));

        let function_turn = &contents[2];
        assert_eq!(function_turn.role, "function");
        // responses arrive out of order but land in call order
        let first = function_turn.parts[0].function_response.as_ref().unwrap();
        assert_eq!(first.response["result"], "sunny");
        let second = function_turn.parts[1].function_response.as_ref().unwrap();
        assert_eq!(second.response["result"], "rainy");
    }

    #[tokio::test]
    async fn unknown_tool_call_id_is_rejected() {
        let request = chat_request(json!({
            "messages": [
                { "role": "assistant", "tool_calls": [
                    { "id": "call_1", "function": { "name": "f", "arguments": "{}" } }
                ]},
                { "role": "tool", "tool_call_id": "call_999", "content": "x" }
            ]
        }));
        let result = transform_messages(&client(), &request.messages).await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn duplicate_tool_response_is_rejected() {
        let request = chat_request(json!({
            "messages": [
                { "role": "assistant", "tool_calls": [
                    { "id": "call_1", "function": { "name": "f", "arguments": "{}" } }
                ]},
                { "role": "tool", "tool_call_id": "call_1", "content": "x" },
                { "role": "tool", "tool_call_id": "call_1", "content": "y" }
            ]
        }));
        let result = transform_messages(&client(), &request.messages).await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn json_schema_sets_schema_and_mime() {
        let request = chat_request(json!({
            "messages": [ { "role": "user", "content": "list colors" } ],
            "response_format": { "type": "json_schema", "json_schema": {
                "schema": { "type": "array", "items": { "type": "string" } }
            }}
        }));
        let config = transform_config(&request, None).unwrap();
        assert_eq!(config.response_mime_type.as_deref(), Some("application/json"));
        assert_eq!(config.response_schema.unwrap()["type"], "array");
    }

    #[test]
    fn enum_schema_uses_enum_mime() {
        let request = chat_request(json!({
            "messages": [ { "role": "user", "content": "pick one" } ],
            "response_format": { "type": "json_schema", "json_schema": {
                "schema": { "type": "string", "enum": ["a", "b"] }
            }}
        }));
        let config = transform_config(&request, None).unwrap();
        assert_eq!(config.response_mime_type.as_deref(), Some("text/x.enum"));
    }

    #[test]
    fn unknown_response_format_fails() {
        let request = chat_request(json!({
            "messages": [ { "role": "user", "content": "hi" } ],
            "response_format": { "type": "yaml" }
        }));
        assert!(matches!(
            transform_config(&request, None),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn reasoning_effort_sets_budget_and_suffix_wins() {
        let request = chat_request(json!({
            "messages": [ { "role": "user", "content": "hi" } ],
            "reasoning_effort": "medium"
        }));
        let config = transform_config(&request, None).unwrap();
        assert_eq!(config.thinking_config.unwrap().thinking_budget, 8_192);

        let tag = parse_model_name("gemini-2.0-flash-thinking-high");
        let config = transform_config(&request, tag.thinking_config()).unwrap();
        assert_eq!(config.thinking_config.unwrap().thinking_budget, 24_576);
    }

    #[test]
    fn tool_choice_mapping() {
        let request = chat_request(json!({
            "messages": [ { "role": "user", "content": "hi" } ],
            "tools": [
                { "type": "function", "function": { "name": "f", "parameters": {} } },
                { "type": "retrieval", "function": { "name": "dropped", "parameters": {} } }
            ],
            "tool_choice": "required"
        }));
        let (tools, config) = transform_tools(&request, false).unwrap();
        let declarations = tools.unwrap()[0].function_declarations.clone().unwrap();
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].name, "f");
        assert_eq!(config.unwrap().function_calling_config.mode, "REQUIRED");
    }

    #[test]
    fn named_tool_choice_maps_to_any() {
        let request = chat_request(json!({
            "messages": [ { "role": "user", "content": "hi" } ],
            "tool_choice": { "type": "function", "function": { "name": "lookup" } }
        }));
        let (_, config) = transform_tools(&request, false).unwrap();
        let config = config.unwrap().function_calling_config;
        assert_eq!(config.mode, "ANY");
        assert_eq!(config.allowed_function_names.unwrap(), vec!["lookup"]);
    }

    #[test]
    fn search_decoration_adds_google_search_tool() {
        let request = chat_request(json!({
            "messages": [ { "role": "user", "content": "hi" } ]
        }));
        let (tools, _) = transform_tools(&request, true).unwrap();
        assert!(tools.unwrap()[0].google_search.is_some());
    }
}

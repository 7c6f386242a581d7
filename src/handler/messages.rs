//! Anthropic Messages endpoint, piggybacking on the chat pipeline.

use crate::claude::{from_claude, to_claude_response, ClaudeStreamRewriter};
use crate::error::{apply_cors, GatewayError, ProxyResult};
use crate::handler::chat::{
    forward_upstream_error, new_completion_id, stream_response, FrameSink,
};
use crate::logger::WIRE_LOG_TARGET;
use crate::router::AppState;
use crate::transform::model_tag::parse_model_name;
use crate::transform::request::build_gemini_request;
use crate::transform::response::process_completions_response;
use crate::transform::stream::{ChunkTransformer, StreamItem};
use crate::types::claude::{ClaudeErrorEnvelope, ClaudeRequest};
use crate::types::gemini::GeminiResponse;
use crate::upstream::{self, GeminiTask};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use std::sync::Arc;

impl FrameSink for ClaudeStreamRewriter {
    fn on_item(&mut self, item: &StreamItem) -> Vec<String> {
        ClaudeStreamRewriter::on_item(self, item)
    }

    fn finish(&mut self) -> Vec<String> {
        ClaudeStreamRewriter::finish(self)
    }
}

/// POST /v1/messages.
pub async fn messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match handle_messages(state, body).await {
        Ok(response) => response,
        Err(error) => claude_error_response(error),
    }
}

async fn handle_messages(state: Arc<AppState>, body: Bytes) -> ProxyResult<Response> {
    if state.config.debug_body_log {
        log::info!(target: WIRE_LOG_TARGET, "messages request: {}", String::from_utf8_lossy(&body));
    }

    let claude_request: ClaudeRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid request body: {}", e)))?;
    let request = from_claude(claude_request)?;
    request.validate().map_err(GatewayError::InvalidRequest)?;

    let model_name = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.default_model.clone());
    let tag = parse_model_name(&model_name);

    let gemini_request = build_gemini_request(&state.http, &request, &tag).await?;
    let api_key = state.credentials.next_key().to_string();
    let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());

    if request.wants_stream() {
        let url =
            upstream::model_url(&state.config, &tag.base_model, GeminiTask::StreamGenerateContent);
        let upstream_response =
            upstream::post_json(&state.http, &url, &api_key, &gemini_request).await?;
        if !upstream_response.status().is_success() {
            return Ok(forward_upstream_error(upstream_response).await);
        }

        let transformer = ChunkTransformer::new(
            new_completion_id(),
            model_name.clone(),
            tag.mode,
            // usage always rides on message_delta in this dialect
            true,
        );
        let rewriter = ClaudeStreamRewriter::new(message_id, model_name);
        Ok(stream_response(upstream_response, transformer, rewriter))
    } else {
        let url = upstream::model_url(&state.config, &tag.base_model, GeminiTask::GenerateContent);
        let upstream_response =
            upstream::post_json(&state.http, &url, &api_key, &gemini_request).await?;

        let status = upstream_response.status().as_u16();
        let body = upstream_response
            .bytes()
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to read upstream body: {}", e)))?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::from_upstream(
                status,
                &String::from_utf8_lossy(&body),
            ));
        }

        let gemini: GeminiResponse = serde_json::from_slice(&body)
            .map_err(|e| GatewayError::Internal(format!("undecodable upstream response: {}", e)))?;
        let completion = process_completions_response(gemini, &model_name, &message_id, tag.mode);
        Ok(Json(to_claude_response(completion)).into_response())
    }
}

/// Gateway errors leave this endpoint wearing the Anthropic envelope.
fn claude_error_response(error: GatewayError) -> Response {
    let status = error.status();
    let error_type = match status.as_u16() {
        400 => "invalid_request_error",
        401 => "authentication_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        500..=599 => "api_error",
        _ => "invalid_request_error",
    };
    log::warn!("messages request failed: {} {}", status, error);
    let mut response = (
        status,
        Json(ClaudeErrorEnvelope::new(error_type, error.to_string())),
    )
        .into_response();
    apply_cors(&mut response);
    response
}

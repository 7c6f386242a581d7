//! OpenAI embeddings over Gemini embedContent / batchEmbedContents.

use crate::error::{GatewayError, ProxyResult};
use crate::router::AppState;
use crate::transform::response::process_embeddings_response;
use crate::types::gemini::{
    GeminiBatchEmbedEntry, GeminiBatchEmbedRequest, GeminiContent, GeminiEmbedRequest,
    GeminiEmbedResponse, GeminiPart,
};
use crate::types::openai::EmbeddingsRequest;
use crate::upstream::{self, GeminiTask};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use std::sync::Arc;

/// Model used when an embeddings request names none.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

fn text_content(text: String) -> GeminiContent {
    GeminiContent {
        role: "user".to_string(),
        parts: vec![GeminiPart::text(text)],
    }
}

/// POST /embeddings, /v1/embeddings and /embed.
pub async fn embeddings(State(state): State<Arc<AppState>>, body: Bytes) -> ProxyResult<Response> {
    let request: EmbeddingsRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid request body: {}", e)))?;

    let model = request
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());
    let inputs = request.input.into_vec();
    if inputs.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "input must not be empty".to_string(),
        ));
    }

    let api_key = state.credentials.next_key().to_string();
    let batched = inputs.len() > 1;
    let task = if batched {
        GeminiTask::BatchEmbedContents
    } else {
        GeminiTask::EmbedContent
    };
    let url = upstream::model_url(&state.config, &model, task);

    let upstream_response = if batched {
        let bare_model = model.strip_prefix("models/").unwrap_or(&model);
        let payload = GeminiBatchEmbedRequest {
            requests: inputs
                .into_iter()
                .map(|text| GeminiBatchEmbedEntry {
                    model: format!("models/{}", bare_model),
                    content: text_content(text),
                    output_dimensionality: request.dimensions,
                })
                .collect(),
        };
        upstream::post_json(&state.http, &url, &api_key, &payload).await?
    } else {
        let payload = GeminiEmbedRequest {
            content: text_content(inputs.into_iter().next().unwrap_or_default()),
            output_dimensionality: request.dimensions,
        };
        upstream::post_json(&state.http, &url, &api_key, &payload).await?
    };

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

    let gemini: GeminiEmbedResponse = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::Internal(format!("undecodable upstream response: {}", e)))?;
    Ok(Json(process_embeddings_response(gemini, &model)).into_response())
}

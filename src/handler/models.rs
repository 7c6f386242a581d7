//! OpenAI model listing backed by the upstream model catalog.

use crate::error::{GatewayError, ProxyResult};
use crate::router::AppState;
use crate::types::gemini::GeminiModelList;
use crate::types::openai::{ModelEntry, ModelList};
use crate::upstream;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

/// GET /models and /v1/models.
pub async fn models(State(state): State<Arc<AppState>>) -> ProxyResult<Response> {
    let api_key = state.credentials.next_key().to_string();
    let url = upstream::models_url(&state.config);
    let upstream_response = upstream::get(&state.http, &url, &api_key).await?;

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

    let catalog: GeminiModelList = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::Internal(format!("undecodable upstream response: {}", e)))?;

    let created = chrono::Utc::now().timestamp();
    let list = ModelList {
        object: "list".to_string(),
        data: catalog
            .models
            .into_iter()
            .map(|entry| ModelEntry {
                id: entry
                    .name
                    .strip_prefix("models/")
                    .unwrap_or(&entry.name)
                    .to_string(),
                object: "model".to_string(),
                created,
                owned_by: "google".to_string(),
            })
            .collect(),
    };
    Ok(Json(list).into_response())
}

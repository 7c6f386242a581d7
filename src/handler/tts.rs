//! TTS endpoints: the SSE orchestrator (fresh and resumable) and the
//! single-sentence JSON variant.

use crate::error::{GatewayError, ProxyResult};
use crate::handler::chat::sse_response;
use crate::router::AppState;
use crate::tts::orchestrator::{self, TtsParams, TtsRequest};
use crate::types::constants::{ROUTER_COUNTER_NAME, TTS_AUDIO_MIME};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Default, Deserialize)]
pub struct TtsQuery {
    #[serde(rename = "jobId")]
    pub job_id: Option<String>,
}

fn parse_params(body: &Bytes) -> ProxyResult<TtsParams> {
    let request: TtsRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid request body: {}", e)))?;
    request.into_params()
}

fn ensure_backends(state: &AppState) -> ProxyResult<()> {
    if state.tts.backends.is_empty() {
        return Err(GatewayError::Internal(
            "no backend services configured".to_string(),
        ));
    }
    Ok(())
}

fn orchestrate(state: Arc<AppState>, job_id: Option<String>, params: TtsParams) -> Response {
    let rx = orchestrator::start(state.tts.clone(), job_id, params);
    let body = Body::from_stream(
        ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(Bytes::from(frame))),
    );
    sse_response(body, "text/event-stream; charset=utf-8")
}

/// POST /tts — the gateway variant; every request is a fresh job.
pub async fn tts(State(state): State<Arc<AppState>>, body: Bytes) -> ProxyResult<Response> {
    ensure_backends(&state)?;
    let params = parse_params(&body)?;
    Ok(orchestrate(state, None, params))
}

/// POST /api/tts — the external variant; `?jobId=` resumes a prior job.
pub async fn api_tts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TtsQuery>,
    body: Bytes,
) -> ProxyResult<Response> {
    ensure_backends(&state)?;
    let params = parse_params(&body)?;
    Ok(orchestrate(state, query.job_id, params))
}

/// POST /rawtts — synthesizes the body as a single sentence and returns the
/// audio inline instead of streaming.
pub async fn raw_tts(State(state): State<Arc<AppState>>, body: Bytes) -> ProxyResult<Response> {
    ensure_backends(&state)?;
    let params = parse_params(&body)?;

    let pick = state
        .tts
        .counter
        .increment(ROUTER_COUNTER_NAME)
        .await
        .map_err(|e| GatewayError::Internal(format!("counter unavailable: {}", e)))?;
    let worker_index = (pick as usize) % state.tts.backends.len();

    let audio = state
        .tts
        .backends
        .synthesize(worker_index, 0, &params.text, &params.voice_id, &params.api_key)
        .await
        .map_err(|e| match e {
            crate::tts::worker::SynthError::Status { status, .. } => {
                GatewayError::from_upstream(status, &e.to_string())
            }
            other => GatewayError::Internal(other.to_string()),
        })?;

    Ok(Json(json!({
        "audioContentBase64": audio,
        "mimeType": TTS_AUDIO_MIME,
    }))
    .into_response())
}

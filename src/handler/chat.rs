//! OpenAI chat completions, non-streaming and streaming.

use crate::error::{GatewayError, ProxyResult};
use crate::logger::WIRE_LOG_TARGET;
use crate::router::AppState;
use crate::transform::model_tag::parse_model_name;
use crate::transform::request::build_gemini_request;
use crate::transform::response::process_completions_response;
use crate::transform::stream::{
    done_frame, render_openai_frame, ChunkTransformer, SseFramer, StreamItem,
};
use crate::types::gemini::GeminiResponse;
use crate::types::openai::ChatRequest;
use crate::upstream::{self, GeminiTask};
use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Turns transformed stream items into outgoing frames for one dialect.
/// `finish` emits whatever closes the stream after the transformer flush.
pub trait FrameSink: Send + 'static {
    fn on_item(&mut self, item: &StreamItem) -> Vec<String>;
    fn finish(&mut self) -> Vec<String>;
}

/// The OpenAI dialect: chunks as `data:` frames, `data: [DONE]` terminator.
pub struct OpenAiSink;

impl FrameSink for OpenAiSink {
    fn on_item(&mut self, item: &StreamItem) -> Vec<String> {
        vec![render_openai_frame(item)]
    }

    fn finish(&mut self) -> Vec<String> {
        vec![done_frame()]
    }
}

/// POST /chat/completions and /v1/chat/completions.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ProxyResult<Response> {
    if state.config.debug_body_log {
        log::info!(target: WIRE_LOG_TARGET, "chat request: {}", String::from_utf8_lossy(&body));
    }

    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid request body: {}", e)))?;

    let model_name = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.default_model.clone());
    let tag = parse_model_name(&model_name);

    let gemini_request = build_gemini_request(&state.http, &request, &tag).await?;
    let api_key = state.credentials.next_key().to_string();
    let completion_id = new_completion_id();

    if request.wants_stream() {
        let url =
            upstream::model_url(&state.config, &tag.base_model, GeminiTask::StreamGenerateContent);
        let upstream_response =
            upstream::post_json(&state.http, &url, &api_key, &gemini_request).await?;

        if !upstream_response.status().is_success() {
            // headers are not committed yet; forward the upstream error as-is
            return Ok(forward_upstream_error(upstream_response).await);
        }

        let transformer = ChunkTransformer::new(
            completion_id,
            model_name.clone(),
            tag.mode,
            request.include_usage(),
        );
        Ok(stream_response(upstream_response, transformer, OpenAiSink))
    } else {
        let url = upstream::model_url(&state.config, &tag.base_model, GeminiTask::GenerateContent);
        let upstream_response =
            upstream::post_json(&state.http, &url, &api_key, &gemini_request).await?;

        let status = upstream_response.status().as_u16();
        let body = upstream_response
            .bytes()
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to read upstream body: {}", e)))?;
        if state.config.debug_body_log {
            log::info!(target: WIRE_LOG_TARGET, "gemini response ({}): {}", status, String::from_utf8_lossy(&body));
        }
        if !(200..300).contains(&status) {
            return Err(GatewayError::from_upstream(
                status,
                &String::from_utf8_lossy(&body),
            ));
        }

        let gemini: GeminiResponse = serde_json::from_slice(&body)
            .map_err(|e| GatewayError::Internal(format!("undecodable upstream response: {}", e)))?;
        let completion =
            process_completions_response(gemini, &model_name, &completion_id, tag.mode);
        Ok(Json(completion).into_response())
    }
}

/// Builds a passthrough response from a pre-200 upstream error on the
/// streaming path.
pub async fn forward_upstream_error(upstream_response: reqwest::Response) -> Response {
    let status = upstream_response.status();
    let content_type = upstream_response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let body = upstream_response.bytes().await.unwrap_or_default();
    log::warn!(
        "upstream stream request failed pre-flight: {} {}",
        status,
        String::from_utf8_lossy(&body)
    );
    Response::builder()
        .status(status.as_u16())
        .header(http::header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            GatewayError::Internal("response build failed".to_string()).into_response()
        })
}

/// Wires the two-stage pipeline from upstream bytes into an SSE response.
/// The spawned pipeline task is the single producer; the HTTP body drains
/// the channel.
pub fn stream_response(
    upstream_response: reqwest::Response,
    transformer: ChunkTransformer,
    sink: impl FrameSink,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(32);
    tokio::spawn(pump_stream(upstream_response, transformer, sink, tx));
    sse_response(Body::from_stream(ReceiverStream::new(rx)), "text/event-stream")
}

pub fn sse_response(body: Body, content_type: &str) -> Response {
    Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, content_type)
        .header(http::header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| {
            GatewayError::Internal("response build failed".to_string()).into_response()
        })
}

async fn send_frames(
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
    frames: Vec<String>,
) -> bool {
    for frame in frames {
        if tx.send(Ok(Bytes::from(frame))).await.is_err() {
            return false;
        }
    }
    true
}

/// The pipeline driver: frame upstream bytes (stage 1), transform (stage 2),
/// render through the sink, and push to the single writer.
async fn pump_stream(
    upstream_response: reqwest::Response,
    mut transformer: ChunkTransformer,
    mut sink: impl FrameSink,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
) {
    let mut framer = SseFramer::new();
    let mut byte_stream = upstream_response.bytes_stream();

    while let Some(next) = byte_stream.next().await {
        match next {
            Ok(chunk) => {
                for payload in framer.push(&chunk) {
                    for item in transformer.transform(payload) {
                        if !send_frames(&tx, sink.on_item(&item)).await {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                log::error!("upstream stream read failed: {}", e);
                let item = StreamItem::Raw(format!(
                    "data: {{\"error\":{{\"message\":\"upstream stream failed: {}\"}}}}\n\n",
                    e
                ));
                let _ = send_frames(&tx, sink.on_item(&item)).await;
                break;
            }
        }
    }

    if let Some(remainder) = framer.finish() {
        for item in transformer.transform(remainder) {
            if !send_frames(&tx, sink.on_item(&item)).await {
                return;
            }
        }
    }
    for item in transformer.flush() {
        if !send_frames(&tx, sink.on_item(&item)).await {
            return;
        }
    }
    let _ = send_frames(&tx, sink.finish()).await;
}

//! Black-box gateway tests: a real router bound to a loopback port, talking
//! to fake Gemini and TTS-worker servers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use gemway::kv::MemoryKv;
use gemway::router::{build_router, AppState};
use gemway::AppConfig;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

const PASS: &str = "test-pass";

#[derive(Clone, Default)]
struct UpstreamLog {
    api_keys: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

async fn fake_gemini_handler(
    State(log): State<UpstreamLog>,
    Path(model_and_action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    log.api_keys.lock().push(
        headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string(),
    );
    log.bodies.lock().push(body);

    let streaming = model_and_action.ends_with(":streamGenerateContent")
        && query.get("alt").map(String::as_str) == Some("sse");
    if streaming {
        let sse = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}],\"role\":\"model\"},\"finishReason\":\"STOP\",\"index\":0}]}\r\n\r\n";
        axum::response::Response::builder()
            .header("content-type", "text/event-stream")
            .body(axum::body::Body::from(sse))
            .unwrap()
    } else {
        Json(json!({
            "candidates": [{
                "content": { "parts": [ { "text": "Hi!" } ], "role": "model" },
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {
                "promptTokenCount": 1, "candidatesTokenCount": 2, "totalTokenCount": 3
            },
            "modelVersion": "gemini-2.0-flash-001"
        }))
        .into_response()
    }
}

async fn spawn_fake_gemini() -> (String, UpstreamLog) {
    let log = UpstreamLog::default();
    let app = Router::new()
        .route("/v1beta/models/{model_and_action}", post(fake_gemini_handler))
        .with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{}", addr), log)
}

async fn spawn_fake_worker() -> String {
    let app = Router::new().route(
        "/",
        post(|| async { Json(json!({ "audioContentBase64": "QUJD" })) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}", addr)
}

async fn spawn_gateway(upstream: &str, backends: Vec<String>, keys: Vec<String>) -> String {
    let config = AppConfig {
        pass: PASS.to_string(),
        api_keys: keys,
        backend_services: backends,
        default_model: "gemini-2.0-flash".to_string(),
        base_url: upstream.trim_end_matches('/').to_string(),
        api_version: "v1beta".to_string(),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        data_dir: "./ignored".into(),
        log_file: None,
        debug_body_log: false,
    };
    let state = Arc::new(AppState::new(config, Arc::new(MemoryKv::new())).unwrap());
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{}", addr)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn root_is_public() {
    let (upstream, _) = spawn_fake_gemini().await;
    let base = spawn_gateway(&upstream, vec![], vec!["k1".to_string()]).await;
    let response = client().get(&base).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("gemway"));
}

#[tokio::test]
async fn missing_bearer_is_401_with_cors() {
    let (upstream, _) = spawn_fake_gemini().await;
    let base = spawn_gateway(&upstream, vec![], vec!["k1".to_string()]).await;
    let response = client()
        .post(format!("{}/chat/completions", base))
        .json(&json!({ "messages": [ { "role": "user", "content": "hi" } ] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    let body: Value = response.json().await.unwrap();
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn restricted_colo_is_429() {
    let (upstream, _) = spawn_fake_gemini().await;
    let base = spawn_gateway(&upstream, vec![], vec!["k1".to_string()]).await;
    let response = client()
        .post(format!("{}/chat/completions", base))
        .header("authorization", format!("Bearer {}", PASS))
        .header("cf-ray", "8f1d2c3a4b5e6f70-DME")
        .json(&json!({ "messages": [ { "role": "user", "content": "hi" } ] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn unknown_path_is_404_and_wrong_verb_is_405() {
    let (upstream, _) = spawn_fake_gemini().await;
    let base = spawn_gateway(&upstream, vec![], vec!["k1".to_string()]).await;

    let response = client()
        .post(format!("{}/nope", base))
        .header("authorization", format!("Bearer {}", PASS))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = client()
        .get(format!("{}/chat/completions", base))
        .header("authorization", format!("Bearer {}", PASS))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn chat_non_stream_round_trip() {
    let (upstream, log) = spawn_fake_gemini().await;
    let base = spawn_gateway(&upstream, vec![], vec!["key-one".to_string()]).await;

    let response = client()
        .post(format!("{}/v1/chat/completions", base))
        .header("authorization", format!("Bearer {}", PASS))
        .json(&json!({
            "model": "gemini-2.0-flash",
            "messages": [ { "role": "user", "content": "Hello" } ],
            "temperature": 0.7,
            "max_tokens": 100
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Hi!");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["model"], "gemini-2.0-flash-001");
    assert_eq!(body["usage"]["total_tokens"], 3);

    // upstream saw the configured key and the translated body
    assert_eq!(log.api_keys.lock()[0], "key-one");
    let sent = &log.bodies.lock()[0];
    assert_eq!(sent["generationConfig"]["temperature"], 0.7);
    assert_eq!(sent["generationConfig"]["maxOutputTokens"], 100);
    assert_eq!(sent["contents"][0]["parts"][0]["text"], "Hello");
    assert_eq!(sent["safetySettings"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn chat_stream_round_trip() {
    let (upstream, _) = spawn_fake_gemini().await;
    let base = spawn_gateway(&upstream, vec![], vec!["k1".to_string()]).await;

    let response = client()
        .post(format!("{}/chat/completions", base))
        .header("authorization", format!("Bearer {}", PASS))
        .json(&json!({
            "model": "gemini-2.0-flash",
            "messages": [ { "role": "user", "content": "Hello" } ],
            "stream": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = response.text().await.unwrap();
    let role_at = body.find("\"role\":\"assistant\"").unwrap();
    let content_at = body.find("\"content\":\"Hi\"").unwrap();
    let finish_at = body.find("\"finish_reason\":\"stop\"").unwrap();
    let done_at = body.find("data: [DONE]\n\n").unwrap();
    assert!(role_at < content_at && content_at < finish_at && finish_at < done_at);
    assert!(body.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn credential_cursor_advances_once_per_request() {
    let (upstream, log) = spawn_fake_gemini().await;
    let base = spawn_gateway(
        &upstream,
        vec![],
        vec!["key-a".to_string(), "key-b".to_string()],
    )
    .await;

    for _ in 0..4 {
        client()
            .post(format!("{}/chat/completions", base))
            .header("authorization", format!("Bearer {}", PASS))
            .json(&json!({ "messages": [ { "role": "user", "content": "hi" } ] }))
            .send()
            .await
            .unwrap();
    }
    let keys = log.api_keys.lock().clone();
    assert_eq!(keys, vec!["key-a", "key-b", "key-a", "key-b"]);
}

#[tokio::test]
async fn json_schema_reaches_upstream() {
    let (upstream, log) = spawn_fake_gemini().await;
    let base = spawn_gateway(&upstream, vec![], vec!["k1".to_string()]).await;

    client()
        .post(format!("{}/chat/completions", base))
        .header("authorization", format!("Bearer {}", PASS))
        .json(&json!({
            "messages": [ { "role": "user", "content": "list colors" } ],
            "response_format": { "type": "json_schema", "json_schema": {
                "schema": { "type": "array", "items": { "type": "string" } }
            }}
        }))
        .send()
        .await
        .unwrap();

    let sent = &log.bodies.lock()[0];
    assert_eq!(sent["generationConfig"]["responseMimeType"], "application/json");
    assert_eq!(sent["generationConfig"]["responseSchema"]["type"], "array");
}

#[tokio::test]
async fn tts_with_no_backends_is_500() {
    let (upstream, _) = spawn_fake_gemini().await;
    let base = spawn_gateway(&upstream, vec![], vec!["k1".to_string()]).await;
    let response = client()
        .post(format!("{}/api/tts", base))
        .header("authorization", format!("Bearer {}", PASS))
        .json(&json!({ "text": "S1.", "voiceId": "Kore", "apiKey": "k" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn tts_missing_params_is_400() {
    let (upstream, _) = spawn_fake_gemini().await;
    let worker = spawn_fake_worker().await;
    let base = spawn_gateway(&upstream, vec![worker], vec!["k1".to_string()]).await;
    let response = client()
        .post(format!("{}/api/tts", base))
        .header("authorization", format!("Bearer {}", PASS))
        .json(&json!({ "voiceId": "Kore", "apiKey": "k" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn tts_happy_path_streams_messages_and_end() {
    let (upstream, _) = spawn_fake_gemini().await;
    let worker_a = spawn_fake_worker().await;
    let worker_b = spawn_fake_worker().await;
    let base = spawn_gateway(&upstream, vec![worker_a, worker_b], vec!["k1".to_string()]).await;

    let response = client()
        .post(format!("{}/api/tts", base))
        .header("authorization", format!("Bearer {}", PASS))
        .json(&json!({ "text": "S1. S2.", "voiceId": "Kore", "apiKey": "client-key" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = response.text().await.unwrap();
    assert_eq!(body.matches("event: message\n").count(), 2);
    assert!(body.contains("id: 0\n"));
    assert!(body.contains("id: 1\n"));
    assert!(body.contains("\"audioChunk\":\"QUJD\""));
    assert!(body.ends_with("event: end\ndata: \n\n"));
}

#[tokio::test]
async fn rawtts_returns_audio_json() {
    let (upstream, _) = spawn_fake_gemini().await;
    let worker = spawn_fake_worker().await;
    let base = spawn_gateway(&upstream, vec![worker], vec!["k1".to_string()]).await;

    let response = client()
        .post(format!("{}/rawtts", base))
        .header("authorization", format!("Bearer {}", PASS))
        .json(&json!({ "text": "One sentence.", "voiceId": "en-US-Standard-A", "apiKey": "k" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["audioContentBase64"], "QUJD");
}

#[tokio::test]
async fn anthropic_messages_round_trip() {
    let (upstream, log) = spawn_fake_gemini().await;
    let base = spawn_gateway(&upstream, vec![], vec!["k1".to_string()]).await;

    let response = client()
        .post(format!("{}/v1/messages", base))
        .header("x-api-key", PASS)
        .json(&json!({
            "model": "gemini-2.0-flash",
            "max_tokens": 128,
            "system": "be brief",
            "messages": [ { "role": "user", "content": "Hello" } ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Hi!");
    assert_eq!(body["stop_reason"], "end_turn");

    let sent = &log.bodies.lock()[0];
    assert!(sent["systemInstruction"]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .contains("be brief"));
    assert_eq!(sent["generationConfig"]["maxOutputTokens"], 128);
}

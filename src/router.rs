//! The gateway router: route table, data-center gating, client auth, CORS,
//! and the shared application state.

use crate::auth::authenticate;
use crate::config::AppConfig;
use crate::credential::CredentialPool;
use crate::error::GatewayError;
use crate::handler::{chat, embeddings, messages, models, tts};
use crate::kv::KvStore;
use crate::tts::TtsEngine;
use crate::types::constants::RESTRICTED_COLOS;
use axum::{
    extract::{Query, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub credentials: CredentialPool,
    pub http: reqwest::Client,
    pub tts: Arc<TtsEngine>,
}

impl AppState {
    pub fn new(config: AppConfig, kv: Arc<dyn KvStore>) -> Result<Self, String> {
        let credentials = CredentialPool::new(config.api_keys.clone())?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("failed to build http client: {}", e))?;
        let tts = Arc::new(TtsEngine::new(
            kv,
            config.backend_services.clone(),
            http.clone(),
        ));
        Ok(Self {
            config: Arc::new(config),
            credentials,
            http,
            tts,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthQuery {
    key: Option<String>,
}

/// The edge colo rides in the trailing segment of `cf-ray`
/// (`<request-id>-<COLO>`).
fn request_colo(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-ray")
        .and_then(|v| v.to_str().ok())
        .and_then(|ray| ray.rsplit('-').next())
        .map(|colo| colo.trim().to_uppercase())
        .filter(|colo| !colo.is_empty())
}

/// Request gate: restricted-colo refusal, then client authentication.
async fn gate_middleware(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if let Some(colo) = request_colo(request.headers()) {
        if RESTRICTED_COLOS.contains(&colo.as_str()) {
            return Err(GatewayError::RateLimited(format!(
                "requests routed through data center {} are not supported",
                colo
            )));
        }
    }
    authenticate(request.headers(), query.key.as_deref(), &state.config.pass)?;
    Ok(next.run(request).await)
}

async fn root() -> &'static str {
    "gemway is running."
}

async fn not_found(request: Request) -> GatewayError {
    GatewayError::NotFound(request.uri().path().to_string())
}

async fn method_not_allowed() -> GatewayError {
    GatewayError::MethodNotAllowed
}

/// Assembles the complete application router. Handler errors funnel through
/// `GatewayError::into_response`, which attaches status and CORS.
pub fn build_router(state: Arc<AppState>) -> Router {
    let gate = middleware::from_fn_with_state(state.clone(), gate_middleware);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(86_400));

    let protected = Router::new()
        .route("/v1/messages", post(messages::messages))
        .route("/chat/completions", post(chat::chat_completions))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/embeddings", post(embeddings::embeddings))
        .route("/v1/embeddings", post(embeddings::embeddings))
        .route("/embed", post(embeddings::embeddings))
        .route("/models", get(models::models))
        .route("/v1/models", get(models::models))
        .route("/tts", post(tts::tts))
        .route("/rawtts", post(tts::raw_tts))
        .route("/api/tts", post(tts::api_tts))
        .layer(gate);

    Router::new()
        .route("/", get(root))
        .merge(protected)
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(cors)
        .with_state(state)
}

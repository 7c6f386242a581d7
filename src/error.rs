//! Gateway error taxonomy and the single error funnel.
//!
//! Every handler returns `ProxyResult<T>`; the `IntoResponse` impl picks the
//! status, wraps the message in an OpenAI-style error envelope, and attaches
//! the permissive CORS headers so error responses stay consumable from
//! browsers.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Bad JSON, unknown role/content type/response_format, missing TTS
    /// parameters, invalid voice name.
    #[error("{0}")]
    InvalidRequest(String),
    /// Missing or wrong client bearer.
    #[error("Unauthorized: missing or invalid API key")]
    Unauthorized,
    /// Unknown path.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Wrong verb for a known path.
    #[error("Method not allowed")]
    MethodNotAllowed,
    /// Restricted data center or upstream throttling.
    #[error("{0}")]
    RateLimited(String),
    /// Upstream Gemini returned a non-2xx; carries the mapped status and a
    /// friendly message.
    #[error("{message}")]
    Upstream { status: u16, message: String },
    /// Anything that should never surface to a well-behaved client.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::Unauthorized => "authentication_error",
            GatewayError::NotFound(_) => "not_found_error",
            GatewayError::MethodNotAllowed => "invalid_request_error",
            GatewayError::RateLimited(_) => "rate_limit_error",
            GatewayError::Upstream { .. } => "upstream_api_error",
            GatewayError::Internal(_) => "internal_server_error",
        }
    }

    /// Maps an upstream Gemini status code to a friendly client message.
    pub fn from_upstream(status: u16, body: &str) -> Self {
        let detail = extract_upstream_message(body);
        let message = match status {
            400 => format!("Upstream rejected the request: {}", detail),
            401 | 403 => "Upstream authentication failed; check the configured API keys".to_string(),
            404 => format!("Upstream model not found: {}", detail),
            429 => "Upstream rate limit exceeded; try again later".to_string(),
            500..=599 => format!("Upstream server error: {}", detail),
            _ => detail,
        };
        let mapped = match status {
            429 => 429,
            400 | 401 | 403 | 404 => status,
            _ => 502,
        };
        GatewayError::Upstream {
            status: mapped,
            message,
        }
    }
}

/// Pulls `error.message` out of a Gemini error body, falling back to the raw
/// text.
fn extract_upstream_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Inserts the permissive CORS headers onto any response.
pub fn apply_cors(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            log::error!("request failed: {} {}", status, message);
        } else {
            log::warn!("request rejected: {} {}", status, message);
        }
        let body = json!({ "error": { "message": message, "type": self.error_type() } });
        let mut response = (status, Json(body)).into_response();
        apply_cors(&mut response);
        response
    }
}

pub type ProxyResult<T> = std::result::Result<T, GatewayError>;

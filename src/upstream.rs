//! Upstream Gemini dispatch: URL construction and the shared request shape.

use crate::config::AppConfig;
use crate::error::{GatewayError, ProxyResult};
use crate::types::constants::UPSTREAM_CLIENT_ID;
use serde::Serialize;

/// Upstream task selector, the `:{task}` suffix of a model URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiTask {
    GenerateContent,
    StreamGenerateContent,
    EmbedContent,
    BatchEmbedContents,
}

impl GeminiTask {
    fn as_str(&self) -> &'static str {
        match self {
            GeminiTask::GenerateContent => "generateContent",
            GeminiTask::StreamGenerateContent => "streamGenerateContent",
            GeminiTask::EmbedContent => "embedContent",
            GeminiTask::BatchEmbedContents => "batchEmbedContents",
        }
    }
}

/// `{BASE_URL}/{API_VERSION}/models/{model}:{task}`, plus `?alt=sse` for the
/// streaming task.
pub fn model_url(config: &AppConfig, model: &str, task: GeminiTask) -> String {
    let model = model.strip_prefix("models/").unwrap_or(model);
    let mut url = format!(
        "{}/{}/models/{}:{}",
        config.base_url,
        config.api_version,
        model,
        task.as_str()
    );
    if task == GeminiTask::StreamGenerateContent {
        url.push_str("?alt=sse");
    }
    url
}

/// URL of the upstream model listing.
pub fn models_url(config: &AppConfig) -> String {
    format!("{}/{}/models?pageSize=1000", config.base_url, config.api_version)
}

/// POSTs a JSON body upstream with the Gemini auth headers.
pub async fn post_json<T: Serialize>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &T,
) -> ProxyResult<reqwest::Response> {
    client
        .post(url)
        .header("x-goog-api-key", api_key)
        .header("x-goog-api-client", UPSTREAM_CLIENT_ID)
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| GatewayError::Internal(format!("request to upstream failed: {}", e)))
}

/// GETs an upstream URL with the Gemini auth headers.
pub async fn get(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
) -> ProxyResult<reqwest::Response> {
    client
        .get(url)
        .header("x-goog-api-key", api_key)
        .header("x-goog-api-client", UPSTREAM_CLIENT_ID)
        .send()
        .await
        .map_err(|e| GatewayError::Internal(format!("request to upstream failed: {}", e)))
}

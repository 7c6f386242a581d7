//! Client authentication against the configured `PASS` secret.
//!
//! Accepted carriers, in priority order: `Authorization: Bearer <token>`
//! (OpenAI convention), `x-api-key: <token>` (Anthropic convention), and the
//! `?key=` query parameter (Google AI Studio convention).

use crate::error::{GatewayError, ProxyResult};
use http::HeaderMap;

/// Pulls the client token from whichever carrier is present.
pub fn extract_client_token(headers: &HeaderMap, query_key: Option<&str>) -> Option<String> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let api_key_header = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let query = query_key.map(str::trim).filter(|s| !s.is_empty());

    bearer.or(api_key_header).or(query).map(str::to_string)
}

/// Compares the presented token against the configured secret.
pub fn authenticate(headers: &HeaderMap, query_key: Option<&str>, pass: &str) -> ProxyResult<()> {
    let token = extract_client_token(headers, query_key).ok_or(GatewayError::Unauthorized)?;
    if token == pass {
        Ok(())
    } else {
        log::warn!(
            "authentication failed, token prefix: {:?}",
            token.get(..4).unwrap_or(&token)
        );
        Err(GatewayError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_header_authenticates() {
        let headers = headers_with("authorization", "Bearer s3cret");
        assert!(authenticate(&headers, None, "s3cret").is_ok());
    }

    #[test]
    fn x_api_key_header_authenticates() {
        let headers = headers_with("x-api-key", "s3cret");
        assert!(authenticate(&headers, None, "s3cret").is_ok());
    }

    #[test]
    fn query_key_authenticates() {
        assert!(authenticate(&HeaderMap::new(), Some("s3cret"), "s3cret").is_ok());
    }

    #[test]
    fn bearer_takes_priority_over_query() {
        let headers = headers_with("authorization", "Bearer wrong");
        assert!(authenticate(&headers, Some("s3cret"), "s3cret").is_err());
    }

    #[test]
    fn missing_token_is_unauthorized() {
        assert!(matches!(
            authenticate(&HeaderMap::new(), None, "s3cret"),
            Err(GatewayError::Unauthorized)
        ));
    }
}

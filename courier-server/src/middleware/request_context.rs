//! Request-id assignment and propagation.
//!
//! Runs before everything else so every log line and every response can be
//! tied back to one request, whether the id came from the caller or was
//! minted here.

use std::str::FromStr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use shared::config::server::Config;
use uuid::Uuid;

/// Per-request context carried through the handler chain. Session
/// resolution fills in `user_id` once the cookie has been verified.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct RequestIdState {
    header: HeaderName,
}

impl RequestIdState {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        Self { header }
    }
}

/// Reuses the caller's request id when one is present, mints one when not,
/// and echoes it on the response.
pub async fn assign_request_id(
    State(state): State<RequestIdState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = resolve_request_id(request.headers(), &state.header);

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        user_id: None,
    });

    match HeaderValue::from_str(&request_id) {
        Ok(value) => {
            request
                .headers_mut()
                .insert(state.header.clone(), value.clone());
            let mut response = next.run(request).await;
            response.headers_mut().insert(state.header, value);
            response
        }
        // A minted id always encodes; an inbound one that somehow does not
        // still identifies the request in the extension.
        Err(_) => next.run(request).await,
    }
}

fn resolve_request_id(headers: &HeaderMap, header: &HeaderName) -> String {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> HeaderName {
        HeaderName::from_static("x-request-id")
    }

    #[test]
    fn inbound_request_id_is_reused() {
        let mut headers = HeaderMap::new();
        headers.insert(header(), HeaderValue::from_static("  abc-123 "));
        assert_eq!(resolve_request_id(&headers, &header()), "abc-123");
    }

    #[test]
    fn blank_request_id_is_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(header(), HeaderValue::from_static("   "));
        let minted = resolve_request_id(&headers, &header());
        assert!(Uuid::parse_str(&minted).is_ok());
    }

    #[test]
    fn missing_request_id_is_minted() {
        let minted = resolve_request_id(&HeaderMap::new(), &header());
        assert!(Uuid::parse_str(&minted).is_ok());
    }
}

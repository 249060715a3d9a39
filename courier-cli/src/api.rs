//! REST client for the Courier API.
//!
//! Failures are split by the corrective action they call for: a timeout is
//! an unknown outcome (refresh history, do not blindly resend), an
//! oversized payload needs a smaller file, and a rejected format needs a
//! different message, so each gets its own variant and message.

use std::time::Duration;

use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::models::{Message, SendMessageRequest, User};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

const TEXT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
const MEDIA_SEND_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("request timed out; the outcome is unknown, refresh history before retrying")]
    Timeout,
    #[error("network error: {0}")]
    Network(reqwest::Error),
    #[error("media payload is too large; shrink the file and try again")]
    PayloadTooLarge,
    #[error("the server rejected the message: {0}")]
    Rejected(String),
    #[error("session missing or expired; log in again")]
    Unauthorized,
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

impl ApiClientError {
    fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err)
        }
    }
}

/// Session-scoped client for the REST endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    api_base: Url,
    session_cookie: String,
}

impl ApiClient {
    /// Creates a client for `server` using the given session token.
    ///
    /// # Errors
    /// Returns an error if the server URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(server: &str, token: &str) -> Result<Self, ApiClientError> {
        let api_base = Url::parse(server)?.join("api/")?;
        let http = Client::builder()
            .timeout(TEXT_SEND_TIMEOUT)
            .build()
            .map_err(ApiClientError::Client)?;

        Ok(Self {
            http,
            api_base,
            session_cookie: format!("courier_session={token}"),
        })
    }

    #[must_use]
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    #[must_use]
    pub fn session_cookie(&self) -> &str {
        &self.session_cookie
    }

    /// Fetches the contact roster (everyone but the caller).
    ///
    /// # Errors
    /// Returns an error if the request fails or the server rejects it.
    pub async fn roster(&self) -> Result<Vec<User>, ApiClientError> {
        let url = self.api_base.join("users")?;
        let response = self
            .http
            .get(url)
            .header(header::COOKIE, &self.session_cookie)
            .send()
            .await
            .map_err(ApiClientError::from_request)?;
        decode(response).await
    }

    /// Fetches the full conversation history with `peer_id`.
    ///
    /// # Errors
    /// Returns an error if the request fails or the server rejects it.
    pub async fn history(&self, peer_id: Uuid) -> Result<Vec<Message>, ApiClientError> {
        let url = self.api_base.join(&format!("messages/{peer_id}"))?;
        let response = self
            .http
            .get(url)
            .header(header::COOKIE, &self.session_cookie)
            .send()
            .await
            .map_err(ApiClientError::from_request)?;
        decode(response).await
    }

    /// Sends a message to `peer_id` and returns the canonical record.
    ///
    /// Media sends get a generous timeout; either way a timeout means the
    /// outcome is unknown and history is the source of truth.
    ///
    /// # Errors
    /// Returns an error if the request fails or the server rejects it.
    pub async fn send(
        &self,
        peer_id: Uuid,
        request: &SendMessageRequest,
    ) -> Result<Message, ApiClientError> {
        let url = self.api_base.join(&format!("messages/send/{peer_id}"))?;
        let timeout = if request.image.is_some() || request.video.is_some() {
            MEDIA_SEND_TIMEOUT
        } else {
            TEXT_SEND_TIMEOUT
        };

        let response = self
            .http
            .post(url)
            .header(header::COOKIE, &self.session_cookie)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(ApiClientError::from_request)?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiClientError> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(ApiClientError::from_request);
    }

    let message = problem_message(response).await;
    Err(match status {
        StatusCode::PAYLOAD_TOO_LARGE => ApiClientError::PayloadTooLarge,
        StatusCode::BAD_REQUEST => ApiClientError::Rejected(message),
        StatusCode::UNAUTHORIZED => ApiClientError::Unauthorized,
        other => ApiClientError::Server {
            status: other.as_u16(),
            message,
        },
    })
}

async fn problem_message(response: Response) -> String {
    match response.json::<Value>().await {
        Ok(problem) => problem
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no further details")
            .to_string(),
        Err(_) => "no further details".to_string(),
    }
}

//! SSE consumption for the realtime channel.
//!
//! The parser is incremental: network chunks can split SSE lines at any
//! byte, so partial lines are carried across `push_chunk` calls and only
//! complete `(event, data)` pairs are emitted.

use futures_util::StreamExt;
use reqwest::header;
use shared::models::StreamEvent;
use tracing::debug;

use crate::api::{ApiClient, ApiClientError};

/// Incremental parser for an SSE byte stream.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    partial: String,
    event_name: Option<String>,
    data: String,
}

impl EventStreamParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk and returns every completed
    /// `(event, data)` pair it closed.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<(String, String)> {
        let mut completed = Vec::new();

        self.partial.push_str(chunk);
        while let Some(newline) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=newline).collect();
            self.push_line(line.trim_end_matches(['\n', '\r']), &mut completed);
        }

        completed
    }

    fn push_line(&mut self, line: &str, completed: &mut Vec<(String, String)>) {
        if let Some(value) = line.strip_prefix("event:") {
            self.event_name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push_str(value.trim());
        } else if line.starts_with(':') {
            // Comment lines carry the server's keep-alive pings.
        } else if line.is_empty() {
            if let (Some(name), false) = (self.event_name.take(), self.data.is_empty()) {
                completed.push((name, std::mem::take(&mut self.data)));
            } else {
                self.event_name = None;
                self.data.clear();
            }
        }
    }
}

/// Opens the event stream and feeds decoded events to `on_event` until the
/// connection drops.
///
/// Returning `Ok(())` means the server closed the stream; the caller owns
/// the reconnect policy.
///
/// # Errors
/// Returns an error if the stream cannot be established.
pub async fn follow_events(
    client: &ApiClient,
    mut on_event: impl FnMut(StreamEvent),
) -> Result<(), ApiClientError> {
    let url = client.api_base().join("stream")?;

    // The shared API client enforces request timeouts that would sever a
    // long-lived stream, so the stream gets its own client.
    let response = reqwest::Client::new()
        .get(url)
        .header(header::COOKIE, client.session_cookie())
        .send()
        .await
        .map_err(ApiClientError::Network)?
        .error_for_status()
        .map_err(|err| match err.status() {
            Some(reqwest::StatusCode::UNAUTHORIZED) => ApiClientError::Unauthorized,
            status => ApiClientError::Server {
                status: status.map_or(0, |code| code.as_u16()),
                message: err.to_string(),
            },
        })?;

    let mut parser = EventStreamParser::new();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let bytes = chunk.map_err(ApiClientError::Network)?;
        let text = String::from_utf8_lossy(&bytes);

        for (name, data) in parser.push_chunk(&text) {
            match StreamEvent::parse(&name, &data) {
                Ok(event) => on_event(event),
                Err(err) => debug!("ignoring unrecognized stream event: {err}"),
            }
        }
    }

    Ok(())
}

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use shared::config::server::Config;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    http::error::ApiError,
    middleware::request_context::RequestContext,
    realtime::{ConnectionHandle, ConnectionRegistry},
};

pub type SharedRegistry = Arc<ConnectionRegistry>;

/// Ties a registration to the lifetime of its SSE stream: whenever the
/// stream is dropped (client disconnect, error, or timeout) the binding is
/// removed. The handle check inside `unregister` makes this a no-op when a
/// newer connection has already replaced this one.
struct ConnectionGuard {
    registry: SharedRegistry,
    user_id: Uuid,
    handle: ConnectionHandle,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.user_id, &self.handle);
    }
}

/// Server-sent events endpoint carrying presence snapshots and message
/// deliveries. The handshake is the authenticated request itself: the
/// session's user id becomes the registry binding.
#[utoipa::path(
    get,
    path = "/stream",
    responses(
        (status = 200, description = "Event stream established"),
        (status = 401, description = "Missing or invalid session")
    ),
    tag = "Realtime"
)]
pub async fn stream_events(
    Extension(config): Extension<Arc<Config>>,
    Extension(registry): Extension<SharedRegistry>,
    Extension(context): Extension<RequestContext>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user_id = context
        .user_id
        .ok_or_else(|| ApiError::unauthorized("event stream requires a session"))?;

    info!("establishing event stream for user {}", user_id);

    let (sender, receiver) = mpsc::channel(config.stream.channel_capacity);
    let handle = registry.register(user_id, sender);
    let guard = ConnectionGuard {
        registry: Arc::clone(&registry),
        user_id,
        handle,
    };

    let stream = ReceiverStream::new(receiver).map(move |event| {
        // The guard lives exactly as long as the stream does.
        let _ = &guard;

        let sse = Event::default().event(event.name());
        let sse = match event.to_data() {
            Ok(data) => sse.data(data),
            Err(err) => {
                warn!("failed to serialize stream event: {err}");
                sse.data("{}")
            }
        };
        Ok::<_, Infallible>(sse)
    });

    let keepalive = KeepAlive::new()
        .interval(Duration::from_secs(config.stream.heartbeat_seconds.max(5)))
        .text("keep-alive");

    Ok(Sse::new(stream).keep_alive(keepalive))
}

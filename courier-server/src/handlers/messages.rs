use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use shared::models::{ErrorResponse, Message, SendMessageRequest};
use uuid::Uuid;

use crate::{
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    services::MessageService,
};

/// Full conversation history between the caller and `peer_id`, in
/// persistence order.
#[utoipa::path(
    get,
    path = "/messages/{peer_id}",
    params(("peer_id" = Uuid, Path, description = "The other participant")),
    responses(
        (status = 200, description = "Ordered pair history", body = Vec<Message>),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Messages"
)]
pub async fn get_history(
    Extension(service): Extension<Arc<MessageService>>,
    Extension(context): Extension<RequestContext>,
    Path(peer_id): Path<Uuid>,
) -> AppResult<Json<Vec<Message>>> {
    let user_id = context
        .user_id
        .ok_or_else(|| ApiError::unauthorized("history requires a session"))?;

    let messages = service.history(user_id, peer_id).await?;
    Ok(Json(messages))
}

/// Sends a message to `peer_id`. The canonical record is returned whether
/// or not the recipient was reachable for live delivery.
#[utoipa::path(
    post,
    path = "/messages/send/{peer_id}",
    params(("peer_id" = Uuid, Path, description = "The recipient")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message persisted", body = Message),
        (status = 400, description = "Empty message or conflicting media", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 413, description = "Media exceeds the configured ceiling", body = ErrorResponse),
        (status = 503, description = "Store unavailable; retry is safe", body = ErrorResponse)
    ),
    tag = "Messages"
)]
pub async fn send_message(
    Extension(service): Extension<Arc<MessageService>>,
    Extension(context): Extension<RequestContext>,
    Path(peer_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let user_id = context
        .user_id
        .ok_or_else(|| ApiError::unauthorized("sending requires a session"))?;

    let message = service.send(user_id, peer_id, request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

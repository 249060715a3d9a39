use shared::models::{ErrorResponse, MediaPayload, Message, PresenceSnapshot, SendMessageRequest, User};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Courier API",
        version = "1.0.0",
        description = "API documentation for the Courier direct-messaging service"
    ),
    paths(
        crate::handlers::users::get_roster,
        crate::handlers::messages::get_history,
        crate::handlers::messages::send_message,
        crate::handlers::stream::stream_events,
    ),
    components(
        schemas(
            User,
            Message,
            MediaPayload,
            SendMessageRequest,
            PresenceSnapshot,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Users", description = "Roster endpoints"),
        (name = "Messages", description = "History and send endpoints"),
        (name = "Realtime", description = "Presence and delivery stream")
    )
)]
pub struct ApiDoc;

use std::sync::Arc;

use axum::{extract::Extension, Json};
use shared::models::{ErrorResponse, User};

use crate::{
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    services::UserDirectory,
};

/// Contact roster: every known user except the caller. Online status is
/// not part of this response; clients derive it from presence snapshots.
#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "Roster excluding the caller", body = Vec<User>),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Users"
)]
pub async fn get_roster(
    Extension(directory): Extension<Arc<dyn UserDirectory>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<Vec<User>>> {
    let user_id = context
        .user_id
        .ok_or_else(|| ApiError::unauthorized("roster requires a session"))?;

    let users = directory.roster(user_id).await?;
    Ok(Json(users))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryUserDirectory;
    use shared::models::Timestamp;
    use uuid::Uuid;

    #[tokio::test]
    async fn roster_excludes_the_requesting_user() {
        let me = User {
            id: Uuid::new_v4(),
            full_name: "Me".into(),
            email: "me@example.com".into(),
            avatar: None,
            created_at: Timestamp::now(),
        };
        let peer = User {
            id: Uuid::new_v4(),
            full_name: "Peer".into(),
            email: "peer@example.com".into(),
            avatar: None,
            created_at: Timestamp::now(),
        };

        let directory: Arc<dyn UserDirectory> =
            Arc::new(MemoryUserDirectory::new(vec![me.clone(), peer.clone()]));

        let Json(roster) = get_roster(
            Extension(directory),
            Extension(RequestContext {
                request_id: "req-1".into(),
                user_id: Some(me.id),
            }),
        )
        .await
        .unwrap();

        assert_eq!(roster, vec![peer]);
    }

    #[tokio::test]
    async fn roster_without_session_is_unauthorized() {
        let directory: Arc<dyn UserDirectory> = Arc::new(MemoryUserDirectory::default());
        let result = get_roster(
            Extension(directory),
            Extension(RequestContext::default()),
        )
        .await;
        assert!(result.is_err());
    }
}

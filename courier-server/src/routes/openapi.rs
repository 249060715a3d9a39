use std::sync::Arc;

use crate::{app_state::AppState, openapi::ApiDoc};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use utoipa::OpenApi;

async fn openapi_json() -> impl IntoResponse {
    (StatusCode::OK, Json(ApiDoc::openapi()))
}

pub fn openapi_routes() -> Router<Arc<AppState>> {
    Router::new().route("/openapi/courier.json", get(openapi_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn serves_the_openapi_document() {
        let app = openapi_routes().with_state(Arc::new(AppState::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/openapi/courier.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

fn record_check(endpoint: &'static str, status: &'static str) {
    metrics::counter!(
        "courier_health_checks_total",
        "endpoint" => endpoint,
        "status" => status
    )
    .increment(1);
}

async fn healthz() -> impl IntoResponse {
    record_check("healthz", "ok");
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(pool) = state.pool.as_ref() else {
        // Storeless mode serves traffic from memory and is always ready.
        record_check("readyz", "ok");
        return (StatusCode::OK, Json(HealthResponse { status: "ready" }));
    };

    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
        Ok(_) => {
            record_check("readyz", "ok");
            (StatusCode::OK, Json(HealthResponse { status: "ready" }))
        }
        Err(_) => {
            record_check("readyz", "error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "degraded" }),
            )
        }
    }
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

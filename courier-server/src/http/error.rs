use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use super::problem::ProblemDetails;
use crate::services::{SendMessageError, StoreError};

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_failed", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            message,
        )
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            message,
        )
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let details = self.details;

        let mut problem = ProblemDetails::new(self.status, self.code, self.message);
        if let Some(details) = details {
            problem = problem.with_details(details);
        }

        problem.into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => Self::service_unavailable(message),
            StoreError::Database(db_err) => Self::internal_server_error(db_err.to_string()),
        }
    }
}

impl From<SendMessageError> for ApiError {
    fn from(err: SendMessageError) -> Self {
        match err {
            SendMessageError::Validation(message) => Self::bad_request(message),
            SendMessageError::PayloadTooLarge { limit, actual } => {
                Self::payload_too_large("media payload exceeds the configured ceiling")
                    .with_details(json!({ "limit_bytes": limit, "actual_bytes": actual }))
            }
            SendMessageError::Store(store_err) => Self::from(store_err),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal_server_error(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use http::header::CONTENT_TYPE;
    use serde_json::Value;

    #[tokio::test]
    async fn into_response_serializes_problem_details() {
        let response = ApiError::bad_request("text missing")
            .with_details(json!({ "field": "text" }))
            .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );

        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body to bytes");
        let json: Value =
            serde_json::from_slice(&bytes).expect("problem details deserializes to json");
        assert_eq!(json["code"], "validation_failed");
        assert_eq!(json["message"], "text missing");
        assert_eq!(json["details"]["field"], "text");
    }

    #[test]
    fn send_errors_map_to_matching_status_codes() {
        let validation = ApiError::from(SendMessageError::Validation("empty".into()));
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);

        let too_large = ApiError::from(SendMessageError::PayloadTooLarge {
            limit: 16,
            actual: 32,
        });
        assert_eq!(too_large.status, StatusCode::PAYLOAD_TOO_LARGE);

        let unavailable = ApiError::from(SendMessageError::Store(StoreError::Unavailable(
            "maintenance".into(),
        )));
        assert_eq!(unavailable.status, StatusCode::SERVICE_UNAVAILABLE);

        let database = ApiError::from(SendMessageError::Store(StoreError::Database(
            sqlx::Error::PoolTimedOut,
        )));
        assert_eq!(database.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

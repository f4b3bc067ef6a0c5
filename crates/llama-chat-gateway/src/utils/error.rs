use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::session::SessionError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ApiError::NotFound("Chat history not found.".to_string()),
            SessionError::CapacityExceeded { .. } => ApiError::CapacityExceeded(
                "The maximum number of chat sessions has been reached.".to_string(),
            ),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Validation(msg) => {
                tracing::warn!("Validation error: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "ValidationError", msg)
            }
            ApiError::Forbidden(msg) => {
                tracing::warn!("Forbidden: {}", msg);
                (StatusCode::FORBIDDEN, "Forbidden", msg)
            }
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            }
            ApiError::CapacityExceeded(msg) => {
                tracing::warn!("Capacity exceeded: {}", msg);
                (StatusCode::TOO_MANY_REQUESTS, "CapacityExceeded", msg)
            }
            ApiError::RateLimited(msg) => {
                tracing::warn!("Rate limited: {}", msg);
                (StatusCode::TOO_MANY_REQUESTS, "RateLimited", msg)
            }
            ApiError::Busy(msg) => {
                tracing::warn!("Busy: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Busy", msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::SessionId;

    #[test]
    fn test_session_errors_map_to_statuses() {
        let id = SessionId::parse("ghost").unwrap();
        let not_found = ApiError::from(SessionError::NotFound(id)).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let full = ApiError::from(SessionError::CapacityExceeded { max: 1 }).into_response();
        assert_eq!(full.status(), StatusCode::TOO_MANY_REQUESTS);

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let storage = ApiError::from(SessionError::Storage(io)).into_response();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::state::AppState;
use crate::utils::error::ApiError;

/// Prometheus scrape endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::InternalError(format!("Failed to encode metrics: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response())
}

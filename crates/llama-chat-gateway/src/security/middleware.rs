use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Rejects requests without a valid `X-API-Key`
pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    state.api_key.validate(request.headers())?;
    Ok(next.run(request).await)
}

/// Per-client hourly quota on chat requests
pub async fn chat_rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = addr.ip();
    debug!("Chat request from IP: {}", ip);

    if !state.limiters.check_chat(ip) {
        warn!("Chat rate limit exceeded for IP: {}", ip);
        return Err(ApiError::RateLimited(
            "Too many chat requests, try again later.".to_string(),
        ));
    }

    Ok(next.run(request).await)
}

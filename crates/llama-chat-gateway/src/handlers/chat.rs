use crate::models::chat::{validate_message, ChatQuery, ChatRequest, SessionId};
use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::Limiters;
use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, info, warn};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Streams the engine's reply as plain text, or returns the assembled
/// prompt when `dry_run` is set.
pub async fn chat_handler(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let chat_id = SessionId::parse(&request.chat_id)?;
    let message = validate_message(&request.message)?;

    info!(
        "Chat request for '{}': message_len={}{}",
        chat_id,
        message.len(),
        if query.dry_run { " (Dry Run)" } else { "" }
    );

    let chat_service = &state.chat_service;
    chat_service.admit(&chat_id).await?;

    if query.dry_run {
        let prompt = chat_service.dry_run(&chat_id, &message).await;
        return Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], prompt).into_response());
    }

    let (permit, waited) = Limiters::acquire_timed(
        state.limiters.llm_stream.clone(),
        state.limiters.acquire_timeout,
        "llm_stream",
    )
    .await
    .map_err(|e| {
        warn!("No generation slot for chat_id '{}': {}", chat_id, e);
        ApiError::Busy("All generation slots are busy, try again shortly.".to_string())
    })?;
    debug!("Generation slot acquired in {:?}", waited);

    let stream = chat_service.stream_chat(chat_id, message, Some(permit)).await;

    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], Body::from_stream(stream)).into_response())
}

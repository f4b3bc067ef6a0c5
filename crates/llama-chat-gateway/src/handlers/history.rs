use crate::models::chat::{ChatListResponse, DetailResponse, SessionId, SessionRecord};
use crate::services::ChatService;
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

pub async fn list_chats_handler(
    State(chat_service): State<Arc<ChatService>>,
) -> Result<Json<ChatListResponse>, ApiError> {
    info!("Chat list requested.");
    let chat_ids = chat_service.list().await.map_err(|e| {
        ApiError::InternalError(format!("Failed to retrieve chat list: {}", e))
    })?;
    Ok(Json(ChatListResponse { chat_ids }))
}

pub async fn get_history_handler(
    State(chat_service): State<Arc<ChatService>>,
    Path(chat_id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    let chat_id = SessionId::parse(&chat_id)?;
    info!("History requested for chat_id: '{}'", chat_id);

    let record = chat_service.history(&chat_id).await?;
    Ok(Json(record))
}

pub async fn delete_history_handler(
    State(chat_service): State<Arc<ChatService>>,
    Path(chat_id): Path<String>,
) -> Result<Json<DetailResponse>, ApiError> {
    let chat_id = SessionId::parse(&chat_id)?;
    info!("Delete request for chat_id: '{}'", chat_id);

    chat_service.delete(&chat_id).await?;
    Ok(Json(DetailResponse {
        detail: format!("Chat history '{}' deleted.", chat_id),
    }))
}

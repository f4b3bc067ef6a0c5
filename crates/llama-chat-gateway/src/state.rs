use axum::extract::FromRef;
use std::sync::Arc;

use crate::security::ApiKeyValidator;
use crate::services::ChatService;
use crate::utils::{Limiters, Metrics};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub api_key: Arc<ApiKeyValidator>,
    pub limiters: Limiters,
    pub metrics: Metrics,
}

impl FromRef<AppState> for Arc<ChatService> {
    fn from_ref(state: &AppState) -> Self {
        state.chat_service.clone()
    }
}

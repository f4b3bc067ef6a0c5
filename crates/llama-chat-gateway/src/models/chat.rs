use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::error::ApiError;

pub const MAX_SESSION_ID_LEN: usize = 50;
pub const MAX_MESSAGE_LEN: usize = 2048;

static SESSION_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("session id pattern is valid"));

// ===== DOMAIN MODELS =====

/// Validated session identifier. Safe to use as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Trims surrounding whitespace, then checks length and charset.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_SESSION_ID_LEN {
            return Err(ApiError::Validation(format!(
                "chat_id must be 1-{} characters",
                MAX_SESSION_ID_LEN
            )));
        }
        if !SESSION_ID_PATTERN.is_match(trimmed) {
            return Err(ApiError::Validation(
                "chat_id may only contain letters, digits, '_' and '-'".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trims the message and enforces 1..=MAX_MESSAGE_LEN characters.
pub fn validate_message(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_MESSAGE_LEN {
        return Err(ApiError::Validation(format!(
            "message must be 1-{} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// One completed user/assistant exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub assistant: String,
}

impl Turn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// Persisted state of one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub history: Vec<Turn>,
}

impl SessionRecord {
    /// The most recent `window` turns, oldest first.
    pub fn windowed(&self, window: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }

    /// Appends a turn and drops the oldest ones beyond `window`.
    pub fn push_turn(&mut self, turn: Turn, window: usize) {
        self.history.push(turn);
        let excess = self.history.len().saturating_sub(window);
        if excess > 0 {
            self.history.drain(..excess);
        }
    }
}

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_chat_id")]
    pub chat_id: String,
}

fn default_chat_id() -> String {
    "default".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    pub dry_run: bool,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    pub chat_ids: Vec<SessionId>,
}

#[derive(Debug, Serialize)]
pub struct DetailResponse {
    pub detail: String,
}

//! Per-session conversation state
//!
//! - `store`: durable JSON-file records, one file per session
//! - `lock`: per-session async mutexes serializing load/mutate/save
//! - `prompt`: pure prompt assembly from a record and a new message

mod lock;
pub mod prompt;
mod store;

use thiserror::Error;

use crate::models::chat::SessionId;

pub use lock::SessionLocks;
pub use prompt::{assemble, ASSISTANT_MARKER};
pub use store::{JsonFileStore, SessionStore};

#[cfg(test)]
pub use store::MockSessionStore;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session limit of {max} reached")]
    CapacityExceeded { max: usize },

    #[error("session '{0}' not found")]
    NotFound(SessionId),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub mod chat_service;
pub mod inference;
pub mod session;

pub use chat_service::ChatService;
pub use inference::{GenerationOutcome, InferenceEvent, InferenceStreamer};

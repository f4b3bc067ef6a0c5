pub mod settings;

pub use settings::{HistoryConfig, LimitsConfig, LlmConfig, SecurityConfig, ServerConfig, Settings};

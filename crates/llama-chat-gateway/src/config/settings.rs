use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder key shipped in the sample config. While it is in place the
/// API key check is skipped.
pub const DEFAULT_API_KEY: &str = "your-secret-key-here";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_key: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key: DEFAULT_API_KEY.to_string(),
        }
    }
}

impl SecurityConfig {
    pub fn uses_default_key(&self) -> bool {
        self.api_key == DEFAULT_API_KEY
    }
}

/// How to launch the external generation process.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub cli_path: PathBuf,
    /// Sent as `-m <path>`. Leave unset when `extra_args` selects the model.
    pub model_path: Option<PathBuf>,
    /// Passed between the model flag and the prompt flag
    pub extra_args: Vec<String>,
    pub read_buffer_bytes: usize,
    /// Wall-clock cap on one generation. Unset means unbounded.
    pub max_generation_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            cli_path: PathBuf::from("llama-cli"),
            model_path: Some(PathBuf::from("models/model.gguf")),
            extra_args: Vec::new(),
            read_buffer_bytes: 64,
            max_generation_secs: None,
        }
    }
}

impl LlmConfig {
    pub fn max_generation(&self) -> Option<Duration> {
        self.max_generation_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub dir: PathBuf,
    /// Most recent turns kept per session and fed into the prompt
    pub context_window: usize,
    pub max_sessions: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("chat_history"),
            context_window: 10,
            max_sessions: 100,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub chat_requests_per_hour: u32,
    pub max_concurrent_generations: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            chat_requests_per_hour: 20,
            max_concurrent_generations: 4,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("llm.extra_args"),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make the service silently misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.history.context_window == 0 {
            anyhow::bail!("history.context_window must be > 0");
        }
        if self.history.max_sessions == 0 {
            anyhow::bail!("history.max_sessions must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let settings = Settings::default();
        assert_eq!(settings.history.context_window, 10);
        assert_eq!(settings.history.max_sessions, 100);
        assert_eq!(settings.limits.chat_requests_per_hour, 20);
        assert!(settings.security.uses_default_key());
        assert!(settings.llm.max_generation().is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_history_limits_rejected() {
        let mut settings = Settings::default();
        settings.history.context_window = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("context_window"));

        let mut settings = Settings::default();
        settings.history.max_sessions = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("max_sessions"));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config = Config::builder()
            .add_source(config::File::from_str(
                "[history]\nmax_sessions = 3\n\n[llm]\nmax_generation_secs = 30\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let settings: Settings = config.try_deserialize().unwrap();

        assert_eq!(settings.history.max_sessions, 3);
        assert_eq!(settings.history.context_window, 10);
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.llm.max_generation(), Some(Duration::from_secs(30)));
    }
}

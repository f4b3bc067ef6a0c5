use crate::utils::error::ApiError;
use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::config::SecurityConfig;

pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone)]
pub struct ApiKeyValidator {
    expected_api_key: String,
    enforced: bool,
}

impl ApiKeyValidator {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            expected_api_key: config.api_key.clone(),
            enforced: !config.uses_default_key(),
        }
    }

    /// Check the `X-API-Key` header.
    ///
    /// With the placeholder key configured every request passes, with a
    /// warning so the insecure setup shows up in the logs.
    pub fn validate(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        if !self.enforced {
            warn!("Running with the default API key. The application is insecure.");
            return Ok(());
        }

        let api_key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Forbidden("Could not validate credentials".to_string()))?;

        if api_key != self.expected_api_key {
            warn!("Invalid X-API-Key");
            return Err(ApiError::Forbidden("Could not validate credentials".to_string()));
        }

        debug!("API key accepted");
        Ok(())
    }
}

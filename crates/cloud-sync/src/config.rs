//! Engine configuration.

use std::time::Duration;

use tapvault_core::sync::{
    CIRCUIT_BREAKER_THRESHOLD, OFFLINE_GRACE_SECS, READ_TIMEOUT_SECS, SAVE_TICK_INTERVAL_MS,
    SAVE_TIMEOUT_SECS,
};

use crate::error::{Result, SyncError};

/// Game API used when nothing else is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";

/// Environment variable overriding the game API base URL.
pub const API_URL_ENV: &str = "TAPVAULT_API_URL";

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub save_interval: Duration,
    /// Timeout for loads and the credential exchange
    pub read_timeout: Duration,
    pub save_timeout: Duration,
    pub circuit_breaker_threshold: u32,
    /// Offline time below which no reward is granted, in seconds
    pub offline_grace: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            save_interval: Duration::from_millis(SAVE_TICK_INTERVAL_MS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            save_timeout: Duration::from_secs(SAVE_TIMEOUT_SECS),
            circuit_breaker_threshold: CIRCUIT_BREAKER_THRESHOLD,
            offline_grace: OFFLINE_GRACE_SECS,
        }
    }
}

impl SyncConfig {
    /// Defaults with the base URL taken from `TAPVAULT_API_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = std::env::var(API_URL_ENV)
            .ok()
            .and_then(|value| normalize_base_url(&value))
        {
            config.api_base_url = url;
        }
        config
    }

    /// Replace the base URL. Only absolute http(s) URLs are accepted.
    pub fn with_api_base_url(mut self, url: &str) -> Result<Self> {
        let url = normalize_base_url(url)
            .ok_or_else(|| SyncError::Config("API base URL is empty".to_string()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "API base URL must start with http:// or https://, got {}",
                url
            )));
        }
        self.api_base_url = url;
        Ok(self)
    }
}

/// Trim whitespace and trailing slashes; `None` if nothing is left.
pub fn normalize_base_url(value: &str) -> Option<String> {
    Some(value.trim().trim_end_matches('/').to_string()).filter(|v| !v.is_empty())
}

//! Realtime client configuration
//!
//! Loaded from environment variables; every tunable has a default so the
//! library works out of the box against a local stack.

use serde::Deserialize;
use std::env;

/// Top-level configuration for the realtime client
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket gateway URL
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Base URL of the persistence REST API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Quiet period for the typing debouncer, milliseconds
    #[serde(default = "default_typing_quiet_ms")]
    pub typing_quiet_ms: u64,
    /// Upper bound on message ids carried by one mark-seen flush
    #[serde(default = "default_seen_batch_max")]
    pub seen_batch_max: usize,
    /// Reconnect backoff tuning
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Exponential backoff tuning for transport reconnects
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReconnectConfig {
    /// First retry delay, milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap, milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts before the connection is declared lost
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            api_base_url: default_api_base_url(),
            typing_quiet_ms: default_typing_quiet_ms(),
            seen_batch_max: default_seen_batch_max(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:3001/gateway".to_string()
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:3000/api".to_string()
}

fn default_typing_quiet_ms() -> u64 {
    3000
}

fn default_seen_batch_max() -> usize {
    50
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

impl RealtimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file if present. Unset variables fall back to
    /// defaults; malformed numeric values are rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            gateway_url: env::var("DM_GATEWAY_URL").unwrap_or_else(|_| default_gateway_url()),
            api_base_url: env::var("DM_API_BASE_URL").unwrap_or_else(|_| default_api_base_url()),
            typing_quiet_ms: parse_var("DM_TYPING_QUIET_MS", default_typing_quiet_ms)?,
            seen_batch_max: parse_var("DM_SEEN_BATCH_MAX", default_seen_batch_max)?,
            reconnect: ReconnectConfig {
                base_delay_ms: parse_var("DM_RECONNECT_BASE_DELAY_MS", default_base_delay_ms)?,
                max_delay_ms: parse_var("DM_RECONNECT_MAX_DELAY_MS", default_max_delay_ms)?,
                max_attempts: parse_var("DM_RECONNECT_MAX_ATTEMPTS", default_max_attempts)?,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    default: fn() -> T,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(default()),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

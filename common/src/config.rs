//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from `.env` and environment variables.
//! It provides thread-safe access and mutation for tests or runtime overrides.

use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock, RwLockReadGuard};

/// Represents the complete client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    /// Base URL of the backend REST API, e.g. `http://127.0.0.1:3000/api`.
    pub api_base_url: String,
    /// Multiplexed WebSocket endpoint, e.g. `ws://127.0.0.1:3000/ws`.
    pub ws_url: String,
    /// Bearer token attached to REST calls and the WebSocket handshake.
    pub auth_token: String,
    pub http_timeout_secs: u64,
    pub countdown_tick_ms: u64,
    pub ws_ping_secs: u64,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: "development".into(),
            project_name: "eagle-campus-attendance".into(),
            log_level: "attendance=info".into(),
            log_dir: "logs".into(),
            log_file: "attendance.log".into(),
            log_to_stdout: false,
            api_base_url: "http://127.0.0.1:3000/api".into(),
            ws_url: "ws://127.0.0.1:3000/ws".into(),
            auth_token: String::new(),
            http_timeout_secs: 30,
            countdown_tick_ms: 1000,
            ws_ping_secs: 30,
        }
    }
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Missing keys take their defaults. Numeric keys that fail to parse also
    /// fall back to the default and emit a warning.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            env: env::var("APP_ENV").unwrap_or(defaults.env),
            project_name: env::var("PROJECT_NAME").unwrap_or(defaults.project_name),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_dir: env::var("LOG_DIR").unwrap_or(defaults.log_dir),
            log_file: env::var("LOG_FILE").unwrap_or(defaults.log_file),
            log_to_stdout: env::var("LOG_TO_STDOUT").is_ok_and(|v| v == "true"),
            api_base_url: env::var("API_BASE_URL").unwrap_or(defaults.api_base_url),
            ws_url: env::var("WS_URL").unwrap_or(defaults.ws_url),
            auth_token: env::var("AUTH_TOKEN").unwrap_or_default(),
            http_timeout_secs: parse_or("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            countdown_tick_ms: parse_or("COUNTDOWN_TICK_MS", defaults.countdown_tick_ms),
            ws_ping_secs: parse_or("WS_PING_SECS", defaults.ws_ping_secs),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// A poisoned lock still yields the last written value.
    pub fn global() -> RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().unwrap_or_else(|p| p.into_inner());
            *guard = AppConfig::from_env();
        }
    }

    /// Generic internal setter for any field in the config.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock.write().unwrap_or_else(|p| p.into_inner());
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_env(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.env = value.into());
    }

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_api_base_url(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.api_base_url = value.into());
    }

    pub fn set_ws_url(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.ws_url = value.into());
    }

    pub fn set_auth_token(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.auth_token = value.into());
    }

    pub fn set_http_timeout_secs(value: u64) {
        AppConfig::set_field(|cfg| cfg.http_timeout_secs = value);
    }

    pub fn set_countdown_tick_ms(value: u64) {
        AppConfig::set_field(|cfg| cfg.countdown_tick_ms = value);
    }

    pub fn set_ws_ping_secs(value: u64) {
        AppConfig::set_field(|cfg| cfg.ws_ping_secs = value);
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring malformed {key}={raw:?}; using default {default}");
            default
        }),
        Err(_) => default,
    }
}

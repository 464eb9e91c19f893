//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use axum::http::HeaderValue;
use chat_relay_core::{RateLimitSettings, RelaySettings, RetryPolicy};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub system_prompt: Option<String>,
    /// Origins allowed by CORS. Empty means any origin, without credentials.
    pub allowed_origins: Vec<HeaderValue>,
    pub require_bearer: bool,
    /// Adds `Secure` to the session cookie. Only enable behind HTTPS.
    pub cookie_secure: bool,
    /// Enables the admin endpoints when set.
    pub admin_token: Option<String>,
    /// Echo upstream error details in 500 responses.
    pub debug_errors: bool,
    pub history_limit: usize,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    pub sweep_interval: Duration,
    pub max_concurrent_completions: usize,
    pub max_pending_completions: Option<usize>,
    pub completion_max_attempts: u32,
    pub completion_retry_delay: Duration,
    pub completion_timeout: Duration,
    /// `None` keeps sessions until they are cleared or the process exits.
    pub session_idle_timeout: Option<Duration>,
}

/// Idle sessions are dropped after an hour unless configured otherwise.
const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(60 * 60);

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_level: Level::INFO,
            openai_api_key: None,
            openai_base_url: "https://api.deepseek.com".to_string(),
            chat_model: "deepseek-chat".to_string(),
            system_prompt: None,
            allowed_origins: Vec::new(),
            require_bearer: true,
            cookie_secure: false,
            admin_token: None,
            debug_errors: false,
            history_limit: 10,
            rate_limit_max_requests: 30,
            rate_limit_window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            max_concurrent_completions: 4,
            max_pending_completions: None,
            completion_max_attempts: 3,
            completion_retry_delay: Duration::from_millis(1000),
            completion_timeout: Duration::from_secs(40),
            session_idle_timeout: Some(DEFAULT_SESSION_IDLE),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Self::default();

        // --- Load Server Settings ---
        let bind_address = parse_var("BIND_ADDRESS", defaults.bind_address)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let allowed_origins = match optional_var("ALLOWED_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(|origin| {
                    HeaderValue::from_str(origin).map_err(|e| {
                        ConfigError::InvalidValue("ALLOWED_ORIGINS".to_string(), e.to_string())
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        // --- Load Upstream Provider Settings ---
        let openai_api_key = optional_var("OPENAI_API_KEY");
        let openai_base_url = optional_var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url);
        let chat_model = optional_var("CHAT_MODEL").unwrap_or(defaults.chat_model);
        let system_prompt = optional_var("SYSTEM_PROMPT");

        // --- Load Access Settings ---
        let require_bearer = parse_bool("REQUIRE_BEARER", defaults.require_bearer)?;
        let cookie_secure = parse_bool("SESSION_COOKIE_SECURE", defaults.cookie_secure)?;
        let admin_token = optional_var("ADMIN_TOKEN");
        let debug_errors = parse_bool("DEBUG_ERRORS", defaults.debug_errors)?;

        // --- Load Relay Limits ---
        let history_limit = parse_positive("HISTORY_LIMIT", defaults.history_limit)?;
        let rate_limit_max_requests =
            parse_positive("RATE_LIMIT_MAX_REQUESTS", defaults.rate_limit_max_requests)?;
        let rate_limit_window = Duration::from_secs(parse_positive(
            "RATE_LIMIT_WINDOW_SECS",
            defaults.rate_limit_window.as_secs(),
        )?);
        let sweep_interval = Duration::from_secs(parse_positive(
            "RATE_LIMIT_SWEEP_SECS",
            defaults.sweep_interval.as_secs(),
        )?);
        let max_concurrent_completions = parse_positive(
            "MAX_CONCURRENT_COMPLETIONS",
            defaults.max_concurrent_completions,
        )?;
        let max_pending_completions = optional_var("MAX_PENDING_COMPLETIONS")
            .map(|raw| parse_value("MAX_PENDING_COMPLETIONS", &raw))
            .transpose()?;
        let completion_max_attempts =
            parse_positive("COMPLETION_MAX_ATTEMPTS", defaults.completion_max_attempts)?;
        let completion_retry_delay = Duration::from_millis(parse_var(
            "COMPLETION_RETRY_DELAY_MS",
            defaults.completion_retry_delay.as_millis() as u64,
        )?);
        let completion_timeout = Duration::from_secs(parse_positive(
            "COMPLETION_TIMEOUT_SECS",
            defaults.completion_timeout.as_secs(),
        )?);
        // Zero disables idle expiry.
        let session_idle_timeout = match optional_var("SESSION_IDLE_SECS") {
            Some(raw) => match parse_value::<u64>("SESSION_IDLE_SECS", &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => defaults.session_idle_timeout,
        };

        Ok(Self {
            bind_address,
            log_level,
            openai_api_key,
            openai_base_url,
            chat_model,
            system_prompt,
            allowed_origins,
            require_bearer,
            cookie_secure,
            admin_token,
            debug_errors,
            history_limit,
            rate_limit_max_requests,
            rate_limit_window,
            sweep_interval,
            max_concurrent_completions,
            max_pending_completions,
            completion_max_attempts,
            completion_retry_delay,
            completion_timeout,
            session_idle_timeout,
        })
    }

    /// The subset of settings the relay engine needs.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            history_limit: self.history_limit,
            rate_limit: RateLimitSettings {
                max_requests: self.rate_limit_max_requests,
                window: self.rate_limit_window,
            },
            gate_capacity: self.max_concurrent_completions,
            max_pending: self.max_pending_completions,
            retry: RetryPolicy {
                max_attempts: self.completion_max_attempts,
                base_delay: self.completion_retry_delay,
            },
            completion_timeout: self.completion_timeout,
            require_bearer: self.require_bearer,
            sweep_interval: self.sweep_interval,
            session_idle_timeout: self.session_idle_timeout,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_positive<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parse_var(name, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

fn parse_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_var(name).map(|raw| raw.to_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a boolean", raw),
            )),
        },
    }
}

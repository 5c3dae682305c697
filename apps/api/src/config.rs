use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Retries after the first attempt of each model call.
    pub llm_max_retries: u32,
    pub llm_base_delay: Duration,
    /// Non-terminal operations allowed per user.
    pub max_concurrent_operations: usize,
    pub operation_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            llm_max_retries: parse_env("LLM_MAX_RETRIES", 3)?,
            llm_base_delay: Duration::from_millis(parse_env("LLM_BASE_DELAY_MS", 1000)?),
            max_concurrent_operations: parse_env("MAX_CONCURRENT_OPERATIONS", 3)?,
            operation_timeout: Duration::from_secs(parse_env("OPERATION_TIMEOUT_SECS", 30)?),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Reads an optional numeric variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

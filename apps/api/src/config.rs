use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::diagnosis::poller::{RetryPolicy, DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    pub diagnosis: DiagnosisConfig,
}

/// Tuning for the diagnosis engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisConfig {
    pub poll_max_attempts: u32,
    pub poll_interval_ms: u64,
    /// Abort outstanding answer writes on reset instead of letting them land.
    pub cancel_writes_on_reset: bool,
    /// Idle attempts older than this are dropped from the registry.
    pub attempt_ttl_secs: u64,
}

pub const DEFAULT_ATTEMPT_TTL_SECS: u64 = 30 * 60;

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            poll_max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
            cancel_writes_on_reset: false,
            attempt_ttl_secs: DEFAULT_ATTEMPT_TTL_SECS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        let lookup = |key: &str| std::env::var(key).ok();

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            port: parse_var(&lookup, "PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            diagnosis: DiagnosisConfig::from_vars(lookup)?,
        })
    }
}

impl DiagnosisConfig {
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            poll_max_attempts: parse_var(
                &lookup,
                "DIAGNOSIS_POLL_MAX_ATTEMPTS",
                defaults.poll_max_attempts,
            )?,
            poll_interval_ms: parse_var(
                &lookup,
                "DIAGNOSIS_POLL_INTERVAL_MS",
                defaults.poll_interval_ms,
            )?,
            cancel_writes_on_reset: parse_var(
                &lookup,
                "DIAGNOSIS_CANCEL_WRITES_ON_RESET",
                defaults.cancel_writes_on_reset,
            )?,
            attempt_ttl_secs: parse_var(
                &lookup,
                "DIAGNOSIS_ATTEMPT_TTL_SECS",
                defaults.attempt_ttl_secs,
            )?,
        };
        if config.poll_max_attempts == 0 {
            bail!("DIAGNOSIS_POLL_MAX_ATTEMPTS must be at least 1");
        }
        if config.attempt_ttl_secs == 0 {
            bail!("DIAGNOSIS_ATTEMPT_TTL_SECS must be at least 1");
        }
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.poll_max_attempts,
            interval: Duration::from_millis(self.poll_interval_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn attempt_ttl(&self) -> Duration {
        Duration::from_secs(self.attempt_ttl_secs)
    }

    /// How often the background sweeper runs: a quarter of the TTL, at least once a second.
    pub fn sweep_interval(&self) -> Duration {
        (self.attempt_ttl() / 4).max(Duration::from_secs(1))
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

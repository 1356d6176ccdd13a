//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The database URL is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::coordinator::RecoveryMode;
use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between turn attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Default age after which a held turn is considered abandoned.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default key of the scheduler document in the shared store.
pub const DEFAULT_STATE_DOCUMENT: &str = "scheduler_state";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Stable identity of this worker in the rotation.
    pub server_id: String,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub recovery_mode: RecoveryMode,
    pub state_document: String,
    pub job_command: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call [`load_env_file`] before this.
    /// In production, the process environment provides the vars.
    pub fn from_env() -> Result<Self> {
        let recovery_mode = match std::env::var("RECOVERY_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => RecoveryMode::default(),
        };

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            server_id: required_var("SERVER_ID")?,
            poll_interval: seconds_var("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?,
            job_timeout: seconds_var("JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT)?,
            recovery_mode,
            state_document: std::env::var("STATE_DOCUMENT")
                .unwrap_or_else(|_| DEFAULT_STATE_DOCUMENT.to_string()),
            job_command: std::env::var("JOB_COMMAND").ok().map(PathBuf::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Load a `.env` file for the current mode.
///
/// The mode comes from `APP_ENV` (default `development`). Only development
/// reads files: `.env.development` first, then a plain `.env`. Returns the
/// mode so callers can log it.
pub fn load_env_file() -> String {
    let mode = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
    if mode == "development" {
        dotenvy::from_filename(format!(".env.{mode}")).ok();
        dotenvy::dotenv().ok();
    }
    mode
}

fn required_var(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!(
            "required environment variable {name} is not set"
        ))),
    }
}

fn seconds_var(name: &str, default: Duration) -> Result<Duration> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a whole number of seconds, got {raw:?}")))?;
    if secs == 0 {
        return Err(Error::Config(format!("{name} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}

//! Configuration module for the DAO tracker.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Use the document store instead of the in-memory repositories
    pub use_external_store: bool,
    /// Abort on document store connection failure
    pub strict_store: bool,
    /// Fall back to memory when the document store cannot be reached
    pub fallback_on_failure: bool,
    /// Path to the SQLite document store
    pub db_path: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Maximum task lines in a validated change summary
    pub history_max_lines: usize,
    /// History entries kept per day
    pub history_day_capacity: usize,
    /// Notifications kept in the in-memory ring buffer
    pub notification_capacity: usize,
    /// Mirror notifications to email
    pub mail_mirror: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_external_store: false,
            strict_store: false,
            fallback_on_failure: true,
            db_path: PathBuf::from("./data/dao.sqlite"),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            history_max_lines: 6,
            history_day_capacity: 1000,
            notification_capacity: 500,
            mail_mirror: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let log_format = match env::var("DAO_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self {
            use_external_store: env_flag("DAO_USE_EXTERNAL_STORE", defaults.use_external_store),
            strict_store: env_flag("DAO_STRICT_STORE", defaults.strict_store),
            fallback_on_failure: env_flag("DAO_FALLBACK_ON_FAILURE", defaults.fallback_on_failure),
            db_path: env::var("DAO_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            log_level: env::var("DAO_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            history_max_lines: env_number("DAO_HISTORY_MAX_LINES", defaults.history_max_lines),
            history_day_capacity: env_number(
                "DAO_HISTORY_DAY_CAPACITY",
                defaults.history_day_capacity,
            ),
            notification_capacity: env_number(
                "DAO_NOTIFICATION_CAPACITY",
                defaults.notification_capacity,
            ),
            mail_mirror: env_flag("DAO_MAIL_MIRROR", defaults.mail_mirror),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => parse_flag(&value).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_number(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Process-level configuration loaded once from environment variables.
///
/// Business-tunable settings (source URL, caption template, topic limit,
/// thumbnail) are not here; they live in the `bot_config` table so they can
/// be edited at runtime without a restart.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub channel_id: i64,
    pub owner_id: i64,
    pub log_chat_id: Option<i64>,
    pub telegram_api_url: String,
    pub caption_parse_mode: Option<String>,

    // Database
    pub database_path: PathBuf,

    // Relay loop
    pub poll_interval: Duration,
    pub delivery_pause: Duration,
    pub request_timeout: Duration,
    pub file_extension: String,

    // Housekeeping
    pub failed_retention: Duration,
    pub stats_retention_days: u32,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Telegram
            bot_token: required_env("BOT_TOKEN")?,
            channel_id: parse_required_i64("CHANNEL_ID")?,
            owner_id: parse_required_i64("OWNER_ID")?,
            log_chat_id: parse_optional_i64("LOG_CHAT_ID")?,
            telegram_api_url: env_or_default("TELEGRAM_API_URL", "https://api.telegram.org"),
            caption_parse_mode: optional_env("CAPTION_PARSE_MODE"),

            // Database
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/relay.sqlite")),

            // Relay loop
            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 60)?),
            delivery_pause: Duration::from_secs(parse_env_u64("DELIVERY_PAUSE_SECS", 3)?),
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 10)?),
            file_extension: env_or_default("FILE_EXTENSION", "torrent"),

            // Housekeeping
            failed_retention: parse_env_hours("FAILED_RETENTION_HOURS", 24)?,
            stats_retention_days: parse_env_u32("STATS_RETENTION_DAYS", 30)?,

            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("PORT", 8000)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "POLL_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "REQUEST_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.bot_token.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "BOT_TOKEN".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.file_extension.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "FILE_EXTENSION".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        match url::Url::parse(&self.telegram_api_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: "TELEGRAM_API_URL".to_string(),
                    message: format!("must be an http(s) URL, got '{}'", self.telegram_api_url),
                });
            }
        }
        Ok(())
    }

    /// A configuration suitable for tests: no real token, short waits, and a
    /// database path that callers are expected to override.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            bot_token: "test-token".to_string(),
            channel_id: -100_123,
            owner_id: 42,
            log_chat_id: None,
            telegram_api_url: "http://127.0.0.1:9".to_string(),
            caption_parse_mode: None,
            database_path: PathBuf::from("./data/test.sqlite"),
            poll_interval: Duration::from_millis(50),
            delivery_pause: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            file_extension: "torrent".to_string(),
            failed_retention: Duration::from_secs(24 * 3600),
            stats_retention_days: 30,
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_required_i64(name: &str) -> Result<i64, ConfigError> {
    required_env(name)?
        .trim()
        .parse()
        .map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        })
}

fn parse_optional_i64(name: &str) -> Result<Option<i64>, ConfigError> {
    optional_env(name)
        .map(|val| {
            val.trim().parse().map_err(|e| ConfigError::ParseInt {
                name: name.to_string(),
                source: e,
            })
        })
        .transpose()
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_hours(name: &str, default: u64) -> Result<Duration, ConfigError> {
    let hours = parse_env_u64(name, default)?;
    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("{hours} hours is out of range"),
        })
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

//! Configuration management for Reelcast

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::logging::LogFormat;
use crate::types::PlatformKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduling: SchedulingConfig,
    pub quota: QuotaConfig,
    pub platforms: PlatformsConfig,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/reelcast/posts.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Seconds between due-work scans.
    pub poll_interval_secs: u64,
    /// Seconds between retry sweeps.
    pub retry_interval_secs: u64,
    /// Attempt ceiling for retryable failures.
    pub max_attempts: i64,
    /// Cap on next-day requeues after quota denials.
    pub max_deferrals: i64,
    pub retry_backoff_secs: i64,
    /// Upper bound of random jitter added to the retry backoff.
    pub retry_jitter_secs: i64,
    /// A `publishing` claim older than this is considered abandoned.
    pub stale_after_secs: i64,
    /// Ceiling on one post's credential check and publish. Must stay below
    /// `stale_after_secs` so a live claim is never mistaken for an abandoned one.
    pub publish_timeout_secs: u64,
    /// Accounts dispatched concurrently per batch.
    pub workers: usize,
    /// Offset applied to naive times typed by operators, e.g. `+05:30`.
    pub input_utc_offset: String,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            retry_interval_secs: 4 * 60 * 60,
            max_attempts: 3,
            max_deferrals: 7,
            retry_backoff_secs: 60,
            retry_jitter_secs: 30,
            stale_after_secs: 600,
            publish_timeout_secs: 300,
            workers: 4,
            input_utc_offset: "+00:00".to_string(),
        }
    }
}

impl SchedulingConfig {
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.input_utc_offset).ok_or_else(|| {
            ConfigError::Invalid {
                field: "scheduling.input_utc_offset".to_string(),
                reason: format!(
                    "'{}' is not an offset like +05:30 or -04:00",
                    self.input_utc_offset
                ),
            }
            .into()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub daily_limit: i64,
    /// Per-platform overrides of `daily_limit`.
    pub platform_limits: HashMap<PlatformKind, i64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 25,
            platform_limits: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    pub fn limit_for(&self, platform: PlatformKind) -> i64 {
        self.platform_limits
            .get(&platform)
            .copied()
            .unwrap_or(self.daily_limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub graph_base_url: String,
    pub graph_version: String,
    pub request_timeout_secs: u64,
    pub processing_poll_interval_ms: u64,
    pub processing_max_attempts: u32,
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            graph_base_url: "https://graph.facebook.com".to_string(),
            graph_version: "v18.0".to_string(),
            request_timeout_secs: 30,
            processing_poll_interval_ms: 2000,
            processing_max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file at the default location yields the built-in defaults;
    /// a path given through `REELCAST_CONFIG` must exist.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var("REELCAST_CONFIG").is_ok();
        let config_path = resolve_config_path()?;

        let mut config = if !explicit && !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Self::default()
        } else {
            Self::load_from_path(&config_path)?
        };

        if let Ok(db_path) = std::env::var("REELCAST_DB_PATH") {
            config.database.path = db_path;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }

        let invalid = |field: &str, reason: &str| -> Result<()> {
            Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.to_string(),
            }
            .into())
        };

        if self.scheduling.poll_interval_secs == 0 {
            return invalid("scheduling.poll_interval_secs", "must be at least 1");
        }
        if self.scheduling.workers == 0 {
            return invalid("scheduling.workers", "must be at least 1");
        }
        if self.scheduling.max_attempts < 1 {
            return invalid("scheduling.max_attempts", "must be at least 1");
        }
        if self.scheduling.retry_backoff_secs < 0 || self.scheduling.retry_jitter_secs < 0 {
            return invalid("scheduling.retry_backoff_secs", "must not be negative");
        }
        if self.scheduling.publish_timeout_secs == 0 {
            return invalid("scheduling.publish_timeout_secs", "must be at least 1");
        }
        if self.scheduling.publish_timeout_secs as i64 >= self.scheduling.stale_after_secs {
            return invalid(
                "scheduling.publish_timeout_secs",
                "must be less than scheduling.stale_after_secs",
            );
        }
        if self.quota.daily_limit < 0 || self.quota.platform_limits.values().any(|l| *l < 0) {
            return invalid("quota.daily_limit", "must not be negative");
        }
        if self.platforms.processing_max_attempts == 0 {
            return invalid("platforms.processing_max_attempts", "must be at least 1");
        }
        self.scheduling.utc_offset()?;

        Ok(())
    }
}

/// Parse `+HH:MM`, `-HH:MM`, `+HHMM` or `Z` into a fixed offset.
pub fn parse_utc_offset(input: &str) -> Option<FixedOffset> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("z") || input.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match input.chars().next()? {
        '+' => (1, &input[1..]),
        '-' => (-1, &input[1..]),
        _ => return None,
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("REELCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("reelcast").join("config.toml"))
}

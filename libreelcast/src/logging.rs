//! Logging setup shared by the Reelcast binaries
//!
//! All output goes to stderr so stdout stays clean for command results
//! (`reel-queue list --format json | jq`). The level and format come from,
//! in order of precedence: `RUST_LOG`, the `REELCAST_LOG_LEVEL` /
//! `REELCAST_LOG_FORMAT` environment variables, command-line flags, and the
//! `[logging]` section of the config file.
//!
//! ```no_run
//! use libreelcast::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::LoggingSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text without colors
    #[default]
    Text,
    /// One JSON object per line, with structured fields flattened
    Json,
    /// Multi-line colored output for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    /// Forces `debug` unless `RUST_LOG` says otherwise.
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Build from the config file section, then apply the environment and
    /// an optional format given on the command line.
    pub fn resolve(section: &LoggingSection, cli_format: Option<LogFormat>, verbose: bool) -> Self {
        let format = env_format().or(cli_format).unwrap_or(section.format);
        let level = std::env::var("REELCAST_LOG_LEVEL").unwrap_or_else(|_| section.level.clone());
        Self::new(format, level, verbose)
    }

    /// Install the global subscriber.
    ///
    /// A second call is a no-op; the first subscriber stays in place.
    pub fn init(&self) {
        use tracing_subscriber::EnvFilter;

        let fallback = if self.verbose { "debug" } else { self.level.as_str() };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .try_init(),
        };

        if let Err(e) = result {
            tracing::debug!("Logging already initialized: {}", e);
        }
    }
}

fn env_format() -> Option<LogFormat> {
    std::env::var("REELCAST_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Initialize logging from environment variables only.
///
/// Falls back to text at `info` when `REELCAST_LOG_FORMAT` and
/// `REELCAST_LOG_LEVEL` are unset.
pub fn init_default() {
    LoggingConfig::resolve(&LoggingSection::default(), None, false).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("Json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_from_str_invalid() {
        let result = "xml".parse::<LogFormat>();
        assert!(result.unwrap_err().contains("Invalid log format: 'xml'"));
    }

    #[test]
    fn test_log_format_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: LogFormat,
        }
        let parsed: Wrapper = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(parsed.format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_resolve_precedence() {
        std::env::remove_var("REELCAST_LOG_FORMAT");
        std::env::remove_var("REELCAST_LOG_LEVEL");

        let section = LoggingSection {
            format: LogFormat::Pretty,
            level: "warn".to_string(),
        };

        let config = LoggingConfig::resolve(&section, None, false);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, "warn");

        let config = LoggingConfig::resolve(&section, Some(LogFormat::Text), false);
        assert_eq!(config.format, LogFormat::Text);

        std::env::set_var("REELCAST_LOG_FORMAT", "json");
        std::env::set_var("REELCAST_LOG_LEVEL", "trace");
        let config = LoggingConfig::resolve(&section, Some(LogFormat::Text), true);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "trace");
        assert!(config.verbose);

        std::env::remove_var("REELCAST_LOG_FORMAT");
        std::env::remove_var("REELCAST_LOG_LEVEL");
    }
}

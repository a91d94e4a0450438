//! Error types for Reelcast

use thiserror::Error;

use crate::types::FailureKind;

pub type Result<T> = std::result::Result<T, ReelcastError>;

#[derive(Error, Debug)]
pub enum ReelcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ReelcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ReelcastError::InvalidInput(_) => 3,
            ReelcastError::NotFound(_) => 3,
            ReelcastError::Platform(PlatformError::InvalidCredential(_)) => 2,
            ReelcastError::Platform(_) => 1,
            ReelcastError::Config(_) => 2,
            ReelcastError::Database(_) => 2,
        }
    }

    /// Classify this error for storage on a failed post.
    ///
    /// Platform errors keep their own classification; anything else reaching
    /// the dispatch boundary is an internal failure.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ReelcastError::Platform(e) => e.failure_kind(),
            ReelcastError::InvalidInput(_) => FailureKind::Validation,
            _ => FailureKind::Internal,
        }
    }

    /// Text stored in `error_message` on a failed post. Remote messages are
    /// kept verbatim.
    pub fn failure_message(&self) -> String {
        match self {
            ReelcastError::Platform(e) => e.detail().to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Normalized platform protocol errors.
///
/// Messages carry the remote text verbatim for diagnostics; retry decisions
/// are made on the variant only.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Publishing failed: {0}")]
    Publishing(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Media processing timeout: {0}")]
    ProcessingTimeout(String),

    #[error("Media processing error: {0}")]
    ProcessingError(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl PlatformError {
    /// The message without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            PlatformError::InvalidCredential(m)
            | PlatformError::Validation(m)
            | PlatformError::Publishing(m)
            | PlatformError::Network(m)
            | PlatformError::RateLimit(m)
            | PlatformError::ProcessingTimeout(m)
            | PlatformError::ProcessingError(m)
            | PlatformError::NotSupported(m) => m,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PlatformError::InvalidCredential(_) => FailureKind::InvalidCredential,
            PlatformError::Validation(_) | PlatformError::NotSupported(_) => {
                FailureKind::Validation
            }
            PlatformError::Publishing(_) => FailureKind::Publishing,
            PlatformError::Network(_) => FailureKind::Network,
            PlatformError::RateLimit(_) => FailureKind::PlatformRateLimited,
            PlatformError::ProcessingTimeout(_) => FailureKind::ProcessingTimeout,
            PlatformError::ProcessingError(_) => FailureKind::ProcessingError,
        }
    }
}

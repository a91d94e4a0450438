//! Core types for Reelcast

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Target platform of a post. Selects the publisher implementation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Facebook,
    Instagram,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
        }
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "facebook" | "fb" => Ok(Self::Facebook),
            "instagram" | "ig" => Ok(Self::Instagram),
            _ => Err(format!(
                "Unknown platform '{}'. Valid options: facebook, instagram",
                s
            )),
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Photo,
    Video,
    Reel,
}

impl MediaType {
    /// Video media goes through an asynchronous processing pipeline on the
    /// remote side before it can be committed.
    pub fn requires_processing(&self) -> bool {
        matches!(self, Self::Video | Self::Reel)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Reel => "reel",
        }
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "photo" | "image" => Ok(Self::Photo),
            "video" => Ok(Self::Video),
            "reel" | "reels" => Ok(Self::Reel),
            _ => Err(format!(
                "Unknown media type '{}'. Valid options: photo, video, reel",
                s
            )),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post lifecycle state. Only the engine moves a post out of `Scheduled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "publishing" => Ok(Self::Publishing),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown post status '{}'", s)),
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed classification of a failed post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AccountNotFound,
    PostNotFound,
    InvalidCredential,
    Validation,
    DailyLimitReached,
    PlatformRateLimited,
    ProcessingTimeout,
    ProcessingError,
    Network,
    Publishing,
    StaleClaim,
    Internal,
}

/// How the retry sweeper treats a failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Terminal: needs an operator or the account owner.
    Never,
    /// Transient: requeue after the short backoff.
    Backoff,
    /// Quota denial: requeue at the start of the next day.
    NextDay,
}

impl FailureKind {
    pub const ALL: [FailureKind; 12] = [
        Self::AccountNotFound,
        Self::PostNotFound,
        Self::InvalidCredential,
        Self::Validation,
        Self::DailyLimitReached,
        Self::PlatformRateLimited,
        Self::ProcessingTimeout,
        Self::ProcessingError,
        Self::Network,
        Self::Publishing,
        Self::StaleClaim,
        Self::Internal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountNotFound => "account_not_found",
            Self::PostNotFound => "post_not_found",
            Self::InvalidCredential => "invalid_credential",
            Self::Validation => "validation",
            Self::DailyLimitReached => "daily_limit_reached",
            Self::PlatformRateLimited => "platform_rate_limited",
            Self::ProcessingTimeout => "processing_timeout",
            Self::ProcessingError => "processing_error",
            Self::Network => "network",
            Self::Publishing => "publishing",
            Self::StaleClaim => "stale_claim",
            Self::Internal => "internal",
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::AccountNotFound
            | Self::PostNotFound
            | Self::InvalidCredential
            | Self::Validation
            | Self::StaleClaim => RetryPolicy::Never,
            Self::DailyLimitReached => RetryPolicy::NextDay,
            Self::PlatformRateLimited
            | Self::ProcessingTimeout
            | Self::ProcessingError
            | Self::Network
            | Self::Publishing
            | Self::Internal => RetryPolicy::Backoff,
        }
    }

    /// Kinds the sweeper requeues after the short backoff.
    pub fn backoff_kinds() -> Vec<FailureKind> {
        Self::ALL
            .into_iter()
            .filter(|k| k.retry_policy() == RetryPolicy::Backoff)
            .collect()
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown failure kind '{}'", s))
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub platform: PlatformKind,
    pub account_id: String,
    pub content: String,
    pub media_url: Option<String>,
    pub media_type: MediaType,
    pub scheduled_at: Option<i64>,
    pub status: PostStatus,
    pub claimed_at: Option<i64>,
    pub published_at: Option<i64>,
    pub platform_post_id: Option<String>,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub attempt_count: i64,
    pub deferral_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input accepted by the post creation entry point.
///
/// Account resolution (by username or explicit id) happens before this is
/// built.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub platform: PlatformKind,
    pub account_id: String,
    pub content: String,
    pub media_url: Option<String>,
    pub media_type: MediaType,
    /// `None` creates a draft outside the engine's purview.
    pub scheduled_at: Option<i64>,
}

impl Post {
    pub fn from_new(new: NewPost, now: i64) -> Self {
        let status = if new.scheduled_at.is_some() {
            PostStatus::Scheduled
        } else {
            PostStatus::Draft
        };

        Self {
            id: Uuid::new_v4().to_string(),
            platform: new.platform,
            account_id: new.account_id,
            content: new.content,
            media_url: new.media_url,
            media_type: new.media_type,
            scheduled_at: new.scheduled_at,
            status,
            claimed_at: None,
            published_at: None,
            platform_post_id: None,
            error_message: None,
            failure_kind: None,
            attempt_count: 0,
            deferral_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A connected account on an external platform, with its quota state.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub platform: PlatformKind,
    pub username: String,
    /// Facebook page id or Instagram business user id.
    pub remote_id: String,
    pub access_token: SecretString,
    pub daily_count: i64,
    /// `YYYY-MM-DD` in UTC.
    pub last_count_date: Option<String>,
    pub created_at: i64,
}

impl Account {
    pub fn new(
        platform: PlatformKind,
        username: String,
        remote_id: String,
        access_token: SecretString,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            platform,
            username,
            remote_id,
            access_token,
            daily_count: 0,
            last_count_date: None,
            created_at: now,
        }
    }

    pub fn credential(&self) -> Credential {
        Credential {
            remote_id: self.remote_id.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

/// What a publisher needs to act on behalf of an account.
#[derive(Debug, Clone)]
pub struct Credential {
    pub remote_id: String,
    pub access_token: SecretString,
}

/// Payload handed to a publisher.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub post_id: String,
    pub caption: String,
    pub media_url: Option<String>,
    pub media_type: MediaType,
}

impl From<&Post> for PublishRequest {
    fn from(post: &Post) -> Self {
        Self {
            post_id: post.id.clone(),
            caption: post.content.clone(),
            media_url: post.media_url.clone(),
            media_type: post.media_type,
        }
    }
}

/// Result of a quota admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub count_today: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountUsage {
    pub account_id: String,
    pub platform: PlatformKind,
    pub username: String,
    pub count_today: i64,
    pub limit: i64,
}

/// Observability snapshot exposed to collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulingStats {
    pub scheduled_count: i64,
    pub overdue_count: i64,
    pub publishing_count: i64,
    pub failed_count: i64,
    pub published_today_count: i64,
    pub next_scheduled_at: Option<i64>,
    pub per_account_usage: Vec<AccountUsage>,
}

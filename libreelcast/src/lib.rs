//! Reelcast - scheduled publishing for Facebook and Instagram
//!
//! This library stores posts with a publication time, claims them when they
//! come due and publishes them through the Graph API, with a per-account
//! daily limit and automatic retries for transient failures.

pub mod activity;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod rate_limiter;
pub mod scanner;
pub mod scheduling;
pub mod service;
pub mod sweeper;
pub mod types;

// Re-export commonly used types
pub use activity::{ActivityEvent, ActivitySink, EventBus};
pub use config::Config;
pub use db::Database;
pub use error::{PlatformError, ReelcastError, Result};
pub use service::{Scheduler, SchedulerHandle};
pub use types::{
    Account, FailureKind, MediaType, NewPost, PlatformKind, Post, PostStatus, SchedulingStats,
};

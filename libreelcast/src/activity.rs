//! Activity reporting
//!
//! The engine reports every transition it makes to an [`ActivitySink`].
//! Recording is fire-and-forget: a sink that fails logs the problem and
//! returns, and never affects the outcome of a dispatch.
//!
//! Three sinks ship with the crate:
//! - [`Database`] appends to the `activities` table
//! - [`EventBus`] broadcasts to in-process subscribers
//! - [`NoopSink`] drops everything
//!
//! ```
//! use libreelcast::activity::{ActivityEvent, EventBus};
//!
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//! bus.emit(ActivityEvent::PostRecovered {
//!     post_id: "abc123".to_string(),
//!     at: 0,
//! });
//! assert!(receiver.try_recv().is_ok());
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{FailureKind, PlatformKind, PostStatus};
use crate::Database;

#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, event: ActivityEvent);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    PostCreated {
        post_id: String,
        account_id: String,
        platform: PlatformKind,
        scheduled_at: Option<i64>,
        at: i64,
    },

    PostPublished {
        post_id: String,
        account_id: String,
        platform: PlatformKind,
        platform_post_id: String,
        /// Minutes between the scheduled time and the actual publish.
        delay_minutes: i64,
        at: i64,
    },

    PostFailed {
        post_id: String,
        account_id: String,
        platform: PlatformKind,
        kind: FailureKind,
        message: String,
        at: i64,
    },

    PostRequeued {
        post_id: String,
        previous_kind: Option<FailureKind>,
        scheduled_at: i64,
        at: i64,
    },

    PostCancelled {
        post_id: String,
        at: i64,
    },

    /// A stale `publishing` claim was demoted to `failed`.
    PostRecovered {
        post_id: String,
        at: i64,
    },

    /// The outcome of a claimed post could not be recorded. Either the
    /// write failed and the row stays in `publishing` until stale-claim
    /// recovery demotes it, or the row had already left `publishing`
    /// (usually demoted by recovery) and keeps that state.
    TransitionLost {
        post_id: String,
        intended: PostStatus,
        error: String,
        at: i64,
    },
}

impl ActivityEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PostCreated { .. } => "post_created",
            Self::PostPublished { .. } => "post_published",
            Self::PostFailed { .. } => "post_failed",
            Self::PostRequeued { .. } => "post_requeued",
            Self::PostCancelled { .. } => "post_cancelled",
            Self::PostRecovered { .. } => "post_recovered",
            Self::TransitionLost { .. } => "transition_lost",
        }
    }

    pub fn post_id(&self) -> &str {
        match self {
            Self::PostCreated { post_id, .. }
            | Self::PostPublished { post_id, .. }
            | Self::PostFailed { post_id, .. }
            | Self::PostRequeued { post_id, .. }
            | Self::PostCancelled { post_id, .. }
            | Self::PostRecovered { post_id, .. }
            | Self::TransitionLost { post_id, .. } => post_id,
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        match self {
            Self::PostCreated { account_id, .. }
            | Self::PostPublished { account_id, .. }
            | Self::PostFailed { account_id, .. } => Some(account_id),
            _ => None,
        }
    }

    pub fn at(&self) -> i64 {
        match self {
            Self::PostCreated { at, .. }
            | Self::PostPublished { at, .. }
            | Self::PostFailed { at, .. }
            | Self::PostRequeued { at, .. }
            | Self::PostCancelled { at, .. }
            | Self::PostRecovered { at, .. }
            | Self::TransitionLost { at, .. } => *at,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::PostCreated {
                platform,
                scheduled_at: Some(_),
                ..
            } => format!("Scheduled {} post", platform),
            Self::PostCreated { platform, .. } => format!("Saved {} draft", platform),
            Self::PostPublished {
                platform,
                delay_minutes,
                ..
            } => {
                if *delay_minutes > 0 {
                    format!("Published to {} ({} min late)", platform, delay_minutes)
                } else {
                    format!("Published to {}", platform)
                }
            }
            Self::PostFailed {
                platform,
                kind,
                message,
                ..
            } => format!("Failed to publish to {} [{}]: {}", platform, kind, message),
            Self::PostRequeued { previous_kind, .. } => match previous_kind {
                Some(kind) => format!("Requeued after {}", kind),
                None => "Requeued".to_string(),
            },
            Self::PostCancelled { .. } => "Cancelled, moved back to draft".to_string(),
            Self::PostRecovered { .. } => "Abandoned claim recovered".to_string(),
            Self::TransitionLost {
                intended, error, ..
            } => format!("Could not record {} transition: {}", intended, error),
        }
    }
}

#[async_trait]
impl ActivitySink for Database {
    async fn record(&self, event: ActivityEvent) {
        let metadata = serde_json::to_string(&event).ok();
        let result = self
            .insert_activity(
                event.event_type(),
                Some(event.post_id()),
                event.account_id(),
                &event.description(),
                metadata.as_deref(),
                event.at(),
            )
            .await;

        if let Err(e) = result {
            tracing::warn!(
                post_id = %event.post_id(),
                event_type = event.event_type(),
                "Failed to record activity: {}",
                e
            );
        }
    }
}

pub type EventReceiver = broadcast::Receiver<ActivityEvent>;

/// In-process broadcast of activity events.
///
/// Events emitted while nobody is subscribed are dropped. A lagging
/// subscriber loses the oldest events, and the emitter never waits.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ActivityEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ActivityEvent) {
        // Err only means there are no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl ActivitySink for EventBus {
    async fn record(&self, event: ActivityEvent) {
        self.emit(event);
    }
}

pub struct NoopSink;

#[async_trait]
impl ActivitySink for NoopSink {
    async fn record(&self, _event: ActivityEvent) {}
}

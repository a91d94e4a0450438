//! Due-work scanner

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use crate::types::Post;
use crate::Database;

/// Counts from one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub due: usize,
    pub published: usize,
    pub failed: usize,
    /// Claimed elsewhere, or the claim could not be attempted.
    pub skipped: usize,
    /// Claimed here but the outcome could not be written.
    pub lost: usize,
    /// Scheduled posts coming due within the next scan window.
    pub upcoming: usize,
}

impl ScanReport {
    fn from_outcomes(due: usize, outcomes: &[DispatchOutcome]) -> Self {
        let mut report = Self {
            due,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                DispatchOutcome::Published { .. } => report.published += 1,
                DispatchOutcome::Failed { .. } => report.failed += 1,
                DispatchOutcome::AlreadyClaimed { .. } | DispatchOutcome::ClaimError { .. } => {
                    report.skipped += 1
                }
                DispatchOutcome::TransitionLost { .. } => report.lost += 1,
            }
        }
        report
    }
}

pub struct DueScanner {
    db: Arc<Database>,
    dispatcher: Arc<Dispatcher>,
}

impl DueScanner {
    pub fn new(db: Arc<Database>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// Find everything due at `now` and hand it to the dispatcher.
    pub async fn scan_once(&self, now: i64) -> Result<ScanReport> {
        let due = self.db.query_due(now).await?;
        if due.is_empty() {
            debug!("No posts due");
            return Ok(ScanReport::default());
        }

        info!("Found {} post(s) due for publishing", due.len());
        let count = due.len();
        let outcomes = self.dispatcher.dispatch_batch(due, now).await;

        let report = ScanReport::from_outcomes(count, &outcomes);
        info!(
            due = report.due,
            published = report.published,
            failed = report.failed,
            skipped = report.skipped,
            lost = report.lost,
            "Scan pass complete"
        );
        Ok(report)
    }

    /// Scheduled posts coming due within `window_secs` after `now`.
    pub async fn upcoming(&self, now: i64, window_secs: i64) -> Result<Vec<Post>> {
        let posts = self.db.query_upcoming(now, now + window_secs).await?;
        for post in &posts {
            debug!(
                post_id = %post.id,
                scheduled_at = post.scheduled_at,
                "Post coming due"
            );
        }
        Ok(posts)
    }
}

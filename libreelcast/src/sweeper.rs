//! Retry sweeper and stale-claim recovery
//!
//! The sweeper is the only path from `failed` back to `scheduled`. It never
//! publishes anything itself; requeued posts go through the normal scan.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::activity::{ActivityEvent, ActivitySink};
use crate::config::SchedulingConfig;
use crate::error::Result;
use crate::scheduling::{next_utc_midnight, retry_time};
use crate::types::FailureKind;
use crate::Database;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Transient failures requeued after the backoff.
    pub requeued: usize,
    /// Quota denials pushed to the next day.
    pub deferred: usize,
}

pub struct RetrySweeper {
    db: Arc<Database>,
    sink: Arc<dyn ActivitySink>,
    config: SchedulingConfig,
}

impl RetrySweeper {
    pub fn new(db: Arc<Database>, sink: Arc<dyn ActivitySink>, config: SchedulingConfig) -> Self {
        Self { db, sink, config }
    }

    pub async fn sweep(&self, now: i64) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for post in self.db.query_failed_retryable(self.config.max_attempts).await? {
            let at = retry_time(
                now,
                self.config.retry_backoff_secs,
                self.config.retry_jitter_secs,
            );
            if self.db.requeue_post(&post.id, at, now).await? {
                info!(
                    post_id = %post.id,
                    attempt_count = post.attempt_count,
                    kind = ?post.failure_kind,
                    "Requeued failed post"
                );
                self.requeued(&post.id, post.failure_kind, at, now).await;
                report.requeued += 1;
            }
        }

        let tomorrow = next_utc_midnight(now);
        for post in self.db.query_failed_deferred(self.config.max_deferrals).await? {
            if self.db.requeue_post(&post.id, tomorrow, now).await? {
                info!(
                    post_id = %post.id,
                    deferral_count = post.deferral_count,
                    "Deferred post to next day after quota denial"
                );
                self.requeued(&post.id, post.failure_kind, tomorrow, now).await;
                report.deferred += 1;
            }
        }

        if report == SweepReport::default() {
            debug!("Nothing to requeue");
        }
        Ok(report)
    }

    /// Demote `publishing` rows whose claim is older than the stale threshold.
    ///
    /// Recovered posts are terminal; the remote call may have gone through,
    /// so only an operator should send them again.
    pub async fn recover_stale_claims(&self, now: i64) -> Result<Vec<String>> {
        let cutoff = now - self.config.stale_after_secs;
        let recovered = self.db.demote_stale_claims(cutoff, now).await?;

        for post_id in &recovered {
            warn!(post_id = %post_id, "Recovered abandoned publishing claim");
            self.sink
                .record(ActivityEvent::PostRecovered {
                    post_id: post_id.clone(),
                    at: now,
                })
                .await;
        }
        Ok(recovered)
    }

    async fn requeued(
        &self,
        post_id: &str,
        previous_kind: Option<FailureKind>,
        scheduled_at: i64,
        now: i64,
    ) {
        self.sink
            .record(ActivityEvent::PostRequeued {
                post_id: post_id.to_string(),
                previous_kind,
                scheduled_at,
                at: now,
            })
            .await;
    }
}

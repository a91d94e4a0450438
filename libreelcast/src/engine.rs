//! Claim-and-dispatch engine
//!
//! For one post id the engine:
//! 1. claims the row (`scheduled` to `publishing`); losing the claim ends
//!    the attempt without side effects
//! 2. resolves the account and asks the rate limiter for admission
//! 3. checks the credential and runs the platform's publish protocol
//! 4. records `published` (and counts it against the quota) or `failed`
//!
//! Once a row is claimed every outcome ends in an explicit terminal write.
//! If that write itself fails the row stays in `publishing` and stale-claim
//! recovery in the sweeper picks it up later. If the row already left
//! `publishing` the write is refused and the row keeps its current state.
//!
//! A batch runs different accounts concurrently but one account's posts one
//! after another. The quota check and the success count for an account can
//! then never interleave within a process, so the daily limit holds.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityEvent, ActivitySink};
use crate::error::{ReelcastError, Result};
use crate::platforms::PublisherRegistry;
use crate::rate_limiter::RateLimiter;
use crate::scheduling::{utc_date, PassClock};
use crate::types::{Account, Credential, FailureKind, Post, PostStatus, PublishRequest};
use crate::Database;

/// What happened to one candidate post.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Published {
        post_id: String,
        platform_post_id: String,
    },
    Failed {
        post_id: String,
        kind: FailureKind,
        message: String,
    },
    /// Another worker claimed it first, or it is no longer scheduled.
    AlreadyClaimed { post_id: String },
    /// The terminal write did not land: it failed, or the row had already
    /// left `publishing`.
    TransitionLost { post_id: String, intended: PostStatus },
    /// The claim itself could not be attempted.
    ClaimError { post_id: String, error: String },
}

impl DispatchOutcome {
    pub fn post_id(&self) -> &str {
        match self {
            Self::Published { post_id, .. }
            | Self::Failed { post_id, .. }
            | Self::AlreadyClaimed { post_id }
            | Self::TransitionLost { post_id, .. }
            | Self::ClaimError { post_id, .. } => post_id,
        }
    }
}

/// Failure of a claimed post, before it is written.
struct Failure {
    kind: FailureKind,
    message: String,
    account_id: String,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>, post: &Post) -> Self {
        Self {
            kind,
            message: message.into(),
            account_id: post.account_id.clone(),
        }
    }

    fn from_error(error: ReelcastError, post: &Post) -> Self {
        Self::new(error.failure_kind(), error.failure_message(), post)
    }
}

pub struct Dispatcher {
    db: Arc<Database>,
    registry: PublisherRegistry,
    limiter: Arc<RateLimiter>,
    sink: Arc<dyn ActivitySink>,
    workers: usize,
    publish_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Database>,
        registry: PublisherRegistry,
        limiter: Arc<RateLimiter>,
        sink: Arc<dyn ActivitySink>,
        workers: usize,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            db,
            registry,
            limiter,
            sink,
            workers: workers.max(1),
            publish_timeout,
        }
    }

    /// Claim and publish a single post.
    ///
    /// # Errors
    ///
    /// Only when the claim query fails. Everything after a successful claim
    /// is reported through the returned outcome.
    pub async fn dispatch(&self, post_id: &str, now: i64) -> Result<DispatchOutcome> {
        self.dispatch_with(post_id, PassClock::starting_at(now)).await
    }

    async fn dispatch_with(&self, post_id: &str, clock: PassClock) -> Result<DispatchOutcome> {
        let claimed_at = clock.now();
        let post = match self.db.claim_post(post_id, claimed_at).await? {
            Some(post) => post,
            None => {
                debug!(post_id, "Post already claimed or no longer scheduled, skipping");
                return Ok(DispatchOutcome::AlreadyClaimed {
                    post_id: post_id.to_string(),
                });
            }
        };

        info!(
            post_id = %post.id,
            account_id = %post.account_id,
            platform = %post.platform,
            "Claimed post for publishing"
        );

        let result = self.publish_claimed(&post, claimed_at).await;
        let finished_at = clock.now();

        Ok(match result {
            Ok((account, platform_post_id)) => {
                self.finish_published(&post, &account, platform_post_id, finished_at)
                    .await
            }
            Err(failure) => self.finish_failed(&post, failure, finished_at).await,
        })
    }

    /// Dispatch a batch of due posts.
    ///
    /// Up to `workers` accounts are served at once; each account's posts run
    /// sequentially in the order given. Claim and finish times come from a
    /// clock that starts at `now` and advances with the batch.
    pub async fn dispatch_batch(&self, posts: Vec<Post>, now: i64) -> Vec<DispatchOutcome> {
        let clock = PassClock::starting_at(now);

        let per_account: Vec<Vec<DispatchOutcome>> = stream::iter(group_by_account(posts))
            .map(|post_ids| async move {
                let mut outcomes = Vec::with_capacity(post_ids.len());
                for post_id in post_ids {
                    outcomes.push(self.dispatch_logged(post_id, clock).await);
                }
                outcomes
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        per_account.into_iter().flatten().collect()
    }

    async fn dispatch_logged(&self, post_id: String, clock: PassClock) -> DispatchOutcome {
        match self.dispatch_with(&post_id, clock).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(post_id = %post_id, "Failed to claim post: {}", e);
                DispatchOutcome::ClaimError {
                    post_id,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn publish_claimed(
        &self,
        post: &Post,
        now: i64,
    ) -> std::result::Result<(Account, String), Failure> {
        let account = match self.db.get_account(&post.account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return Err(Failure::new(FailureKind::AccountNotFound, "account not found", post))
            }
            Err(e) => return Err(Failure::from_error(e, post)),
        };

        if account.platform != post.platform {
            return Err(Failure::new(
                FailureKind::Validation,
                format!(
                    "account {} is a {} account, post targets {}",
                    account.id, account.platform, post.platform
                ),
                post,
            ));
        }

        let quota = self
            .limiter
            .can_publish(&self.db, &account, &utc_date(now))
            .await
            .map_err(|e| Failure::from_error(e, post))?;
        if !quota.allowed {
            return Err(Failure::new(
                FailureKind::DailyLimitReached,
                format!("daily limit reached ({}/{})", quota.count_today, quota.limit),
                post,
            ));
        }

        let publisher = self.registry.get(post.platform).ok_or_else(|| {
            Failure::new(
                FailureKind::Internal,
                format!("no publisher registered for {}", post.platform),
                post,
            )
        })?;

        let credential: Credential = account.credential();
        let request = PublishRequest::from(post);

        publisher
            .validate(&request)
            .map_err(|e| Failure::from_error(e, post))?;

        let remote = async {
            match publisher.check_credential(&credential).await {
                Ok(()) => publisher.publish(&credential, &request).await,
                Err(e) => Err(e),
            }
        };
        let platform_post_id = match tokio::time::timeout(self.publish_timeout, remote).await {
            Ok(result) => result.map_err(|e| Failure::from_error(e, post))?,
            Err(_) => {
                return Err(Failure::new(
                    FailureKind::Network,
                    format!(
                        "publish timed out after {}",
                        humantime::format_duration(self.publish_timeout)
                    ),
                    post,
                ))
            }
        };

        Ok((account, platform_post_id))
    }

    async fn finish_published(
        &self,
        post: &Post,
        account: &Account,
        platform_post_id: String,
        now: i64,
    ) -> DispatchOutcome {
        // The remote post exists whatever happens to the row below
        if let Err(e) = self
            .limiter
            .record_success(&self.db, &account.id, &utc_date(now))
            .await
        {
            error!(
                post_id = %post.id,
                account_id = %account.id,
                "Published but failed to count against daily quota: {}",
                e
            );
        }

        match self.db.mark_published(&post.id, &platform_post_id, now).await {
            Ok(true) => {
                let delay_minutes = post
                    .scheduled_at
                    .map(|at| ((now - at) / 60).max(0))
                    .unwrap_or(0);

                info!(
                    post_id = %post.id,
                    account_id = %account.id,
                    platform = %post.platform,
                    platform_post_id = %platform_post_id,
                    delay_minutes,
                    "Published post"
                );

                self.sink
                    .record(ActivityEvent::PostPublished {
                        post_id: post.id.clone(),
                        account_id: account.id.clone(),
                        platform: post.platform,
                        platform_post_id: platform_post_id.clone(),
                        delay_minutes,
                        at: now,
                    })
                    .await;

                DispatchOutcome::Published {
                    post_id: post.id.clone(),
                    platform_post_id,
                }
            }
            Ok(false) => {
                self.transition_lost(
                    post,
                    PostStatus::Published,
                    format!(
                        "row left publishing before the result was recorded (remote id {})",
                        platform_post_id
                    ),
                    now,
                )
                .await
            }
            Err(e) => {
                self.transition_lost(
                    post,
                    PostStatus::Published,
                    format!("{} (remote id {})", e, platform_post_id),
                    now,
                )
                .await
            }
        }
    }

    async fn finish_failed(&self, post: &Post, failure: Failure, now: i64) -> DispatchOutcome {
        match self
            .db
            .mark_failed(&post.id, failure.kind, &failure.message, now)
            .await
        {
            Ok(true) => {
                warn!(
                    post_id = %post.id,
                    account_id = %failure.account_id,
                    platform = %post.platform,
                    kind = %failure.kind,
                    "Post failed: {}",
                    failure.message
                );

                self.sink
                    .record(ActivityEvent::PostFailed {
                        post_id: post.id.clone(),
                        account_id: failure.account_id.clone(),
                        platform: post.platform,
                        kind: failure.kind,
                        message: failure.message.clone(),
                        at: now,
                    })
                    .await;

                DispatchOutcome::Failed {
                    post_id: post.id.clone(),
                    kind: failure.kind,
                    message: failure.message,
                }
            }
            Ok(false) => {
                self.transition_lost(
                    post,
                    PostStatus::Failed,
                    "row left publishing before the failure was recorded".to_string(),
                    now,
                )
                .await
            }
            Err(e) => {
                self.transition_lost(post, PostStatus::Failed, e.to_string(), now)
                    .await
            }
        }
    }

    async fn transition_lost(
        &self,
        post: &Post,
        intended: PostStatus,
        error: String,
        now: i64,
    ) -> DispatchOutcome {
        error!(
            post_id = %post.id,
            intended = %intended,
            "Could not record post outcome: {}",
            error
        );

        self.sink
            .record(ActivityEvent::TransitionLost {
                post_id: post.id.clone(),
                intended,
                error,
                at: now,
            })
            .await;

        DispatchOutcome::TransitionLost {
            post_id: post.id.clone(),
            intended,
        }
    }
}

/// Post ids grouped per account, accounts in order of first appearance.
fn group_by_account(posts: Vec<Post>) -> Vec<Vec<String>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<String>> = Vec::new();

    for post in posts {
        match index.get(&post.account_id) {
            Some(&i) => groups[i].push(post.id),
            None => {
                index.insert(post.account_id, groups.len());
                groups.push(vec![post.id]);
            }
        }
    }

    groups
}

//! Scheduler facade
//!
//! `Scheduler` wires the store, rate limiter, publishers, scanner and
//! sweeper together and is the single entry point used by the binaries:
//!
//! - post creation and operator actions (cancel, requeue, schedule a draft)
//! - one-shot passes (`run_scan`, `run_sweep`) for `reel-queue scan`
//! - the long-running loop (`run`) for `reel-send`
//!
//! ```no_run
//! use libreelcast::service::Scheduler;
//!
//! # async fn example() -> libreelcast::Result<()> {
//! let scheduler = Scheduler::new().await?;
//! let handle = scheduler.handle();
//!
//! // From anywhere else, e.g. a signal handler:
//! handle.trigger_scan();
//!
//! scheduler.run(tokio::signal::ctrl_c()).await?;
//! # Ok(())
//! # }
//! ```

use secrecy::SecretString;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::activity::{ActivityEvent, ActivitySink};
use crate::engine::Dispatcher;
use crate::error::{ReelcastError, Result};
use crate::platforms::PublisherRegistry;
use crate::rate_limiter::RateLimiter;
use crate::scanner::{DueScanner, ScanReport};
use crate::scheduling::{now_timestamp, start_of_utc_day, utc_date};
use crate::sweeper::{RetrySweeper, SweepReport};
use crate::types::{
    Account, AccountUsage, NewPost, PlatformKind, Post, PostStatus, PublishRequest,
    SchedulingStats,
};
use crate::{Config, Database};

/// Cloneable handle for nudging a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger: Arc<Notify>,
}

impl SchedulerHandle {
    /// Ask the running loop for an immediate scan pass. Triggers that arrive
    /// while a pass is running coalesce into one follow-up pass.
    pub fn trigger_scan(&self) {
        self.trigger.notify_one();
    }
}

pub struct Scheduler {
    db: Arc<Database>,
    config: Config,
    registry: PublisherRegistry,
    limiter: Arc<RateLimiter>,
    sink: Arc<dyn ActivitySink>,
    scanner: DueScanner,
    sweeper: RetrySweeper,
    trigger: Arc<Notify>,
}

impl Scheduler {
    /// Load configuration from the default location and open the database.
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Open the configured database, register the Graph API publishers and
    /// record activity in the database.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database.path).await?);
        let registry = PublisherRegistry::from_config(&config.platforms)?;
        let sink: Arc<dyn ActivitySink> = db.clone();
        Ok(Self::with_components(db, config, registry, sink))
    }

    /// Assemble from explicit parts; tests swap in mock publishers and an
    /// in-process event bus here.
    pub fn with_components(
        db: Arc<Database>,
        config: Config,
        registry: PublisherRegistry,
        sink: Arc<dyn ActivitySink>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.quota.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            registry.clone(),
            limiter.clone(),
            sink.clone(),
            config.scheduling.workers,
            Duration::from_secs(config.scheduling.publish_timeout_secs),
        ));
        let scanner = DueScanner::new(db.clone(), dispatcher);
        let sweeper = RetrySweeper::new(db.clone(), sink.clone(), config.scheduling.clone());

        Self {
            db,
            config,
            registry,
            limiter,
            sink,
            scanner,
            sweeper,
            trigger: Arc::new(Notify::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            trigger: self.trigger.clone(),
        }
    }

    pub fn trigger_scan(&self) {
        self.trigger.notify_one();
    }

    /// Register an account on a platform.
    pub async fn add_account(
        &self,
        platform: PlatformKind,
        username: &str,
        remote_id: &str,
        token: SecretString,
        now: i64,
    ) -> Result<Account> {
        if username.trim().is_empty() || remote_id.trim().is_empty() {
            return Err(ReelcastError::InvalidInput(
                "account username and remote id are required".to_string(),
            ));
        }

        if self.db.find_account(platform, remote_id).await?.is_some() {
            return Err(ReelcastError::InvalidInput(format!(
                "a {} account with id {} already exists",
                platform, remote_id
            )));
        }

        let account = Account::new(
            platform,
            username.trim().to_string(),
            remote_id.trim().to_string(),
            token,
            now,
        );
        self.db.create_account(&account).await?;
        info!(account_id = %account.id, platform = %platform, "Added account");
        Ok(account)
    }

    /// Validate and store a new post.
    ///
    /// Posts with a time are created `scheduled` and are picked up by the
    /// next scan once due; posts without one are stored as drafts.
    pub async fn create_post(&self, new: NewPost, now: i64) -> Result<Post> {
        let has_media = new.media_url.as_deref().map(|u| !u.trim().is_empty()).unwrap_or(false);
        if new.content.trim().is_empty() && !has_media {
            return Err(ReelcastError::InvalidInput(
                "a post needs a caption or media".to_string(),
            ));
        }

        let account = self
            .db
            .get_account(&new.account_id)
            .await?
            .ok_or_else(|| ReelcastError::NotFound(format!("account {}", new.account_id)))?;
        if account.platform != new.platform {
            return Err(ReelcastError::InvalidInput(format!(
                "account {} is a {} account, not {}",
                account.username, account.platform, new.platform
            )));
        }

        let post = Post::from_new(new, now);
        if let Some(publisher) = self.registry.get(post.platform) {
            publisher
                .validate(&PublishRequest::from(&post))
                .map_err(|e| ReelcastError::InvalidInput(e.failure_message()))?;
        }

        self.db.create_post(&post).await?;
        info!(
            post_id = %post.id,
            account_id = %post.account_id,
            status = %post.status,
            scheduled_at = post.scheduled_at,
            "Created post"
        );

        self.sink
            .record(ActivityEvent::PostCreated {
                post_id: post.id.clone(),
                account_id: post.account_id.clone(),
                platform: post.platform,
                scheduled_at: post.scheduled_at,
                at: now,
            })
            .await;

        Ok(post)
    }

    /// Move a scheduled post back to draft.
    pub async fn cancel_post(&self, post_id: &str, now: i64) -> Result<()> {
        if self.db.cancel_post(post_id, now).await? {
            self.sink
                .record(ActivityEvent::PostCancelled {
                    post_id: post_id.to_string(),
                    at: now,
                })
                .await;
            return Ok(());
        }
        Err(self.wrong_status(post_id, "scheduled").await)
    }

    /// Operator requeue of a failed post, with fresh attempt and deferral
    /// budgets. Works for terminal failures too.
    pub async fn requeue_post(&self, post_id: &str, scheduled_at: i64, now: i64) -> Result<()> {
        let previous_kind = self
            .db
            .get_post(post_id)
            .await?
            .and_then(|p| p.failure_kind);

        if self.db.reset_and_requeue_post(post_id, scheduled_at, now).await? {
            self.sink
                .record(ActivityEvent::PostRequeued {
                    post_id: post_id.to_string(),
                    previous_kind,
                    scheduled_at,
                    at: now,
                })
                .await;
            return Ok(());
        }
        Err(self.wrong_status(post_id, "failed").await)
    }

    /// Give a draft a publication time.
    pub async fn schedule_draft(&self, post_id: &str, scheduled_at: i64, now: i64) -> Result<()> {
        if self.db.schedule_draft(post_id, scheduled_at, now).await? {
            return Ok(());
        }
        Err(self.wrong_status(post_id, "draft").await)
    }

    async fn wrong_status(&self, post_id: &str, expected: &str) -> ReelcastError {
        match self.db.get_post(post_id).await {
            Ok(Some(post)) => ReelcastError::InvalidInput(format!(
                "post {} is {}, expected {}",
                post_id, post.status, expected
            )),
            Ok(None) => ReelcastError::NotFound(format!("post {}", post_id)),
            Err(e) => e,
        }
    }

    pub async fn stats(&self, now: i64) -> Result<SchedulingStats> {
        let today = utc_date(now);
        let per_account_usage = self
            .db
            .list_accounts()
            .await?
            .iter()
            .map(|account| {
                let usage = self.limiter.usage(account, &today);
                AccountUsage {
                    account_id: account.id.clone(),
                    platform: account.platform,
                    username: account.username.clone(),
                    count_today: usage.count_today,
                    limit: usage.limit,
                }
            })
            .collect();

        Ok(SchedulingStats {
            scheduled_count: self.db.count_by_status(PostStatus::Scheduled).await?,
            overdue_count: self.db.count_overdue(now).await?,
            publishing_count: self.db.count_by_status(PostStatus::Publishing).await?,
            failed_count: self.db.count_by_status(PostStatus::Failed).await?,
            published_today_count: self.db.count_published_since(start_of_utc_day(now)).await?,
            next_scheduled_at: self.db.next_scheduled_at(now).await?,
            per_account_usage,
        })
    }

    /// Recover stale claims, then publish everything due at `now`. The
    /// report also counts posts coming due before the next scan.
    pub async fn run_scan(&self, now: i64) -> Result<ScanReport> {
        self.sweeper.recover_stale_claims(now).await?;
        let mut report = self.scanner.scan_once(now).await?;
        let window = self.config.scheduling.poll_interval_secs as i64 * 2;
        report.upcoming = self.scanner.upcoming(now, window).await?.len();
        Ok(report)
    }

    pub async fn run_sweep(&self, now: i64) -> Result<SweepReport> {
        self.sweeper.sweep(now).await
    }

    /// Run scan and sweep passes on their intervals until `shutdown`
    /// resolves. A pass in progress always finishes first.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future,
    {
        let scheduling = &self.config.scheduling;
        info!(
            poll_interval_secs = scheduling.poll_interval_secs,
            retry_interval_secs = scheduling.retry_interval_secs,
            workers = scheduling.workers,
            "Scheduler starting"
        );

        let mut scan_tick = tokio::time::interval(Duration::from_secs(scheduling.poll_interval_secs));
        scan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick =
            tokio::time::interval(Duration::from_secs(scheduling.retry_interval_secs.max(1)));
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }
                _ = self.trigger.notified() => {
                    info!("Manual scan triggered");
                    self.scan_pass().await;
                }
                _ = scan_tick.tick() => self.scan_pass().await,
                _ = sweep_tick.tick() => self.sweep_pass().await,
            }
        }

        Ok(())
    }

    async fn scan_pass(&self) {
        if let Err(e) = self.run_scan(now_timestamp()).await {
            error!("Scan pass failed: {}", e);
        }
    }

    async fn sweep_pass(&self) {
        match self.run_sweep(now_timestamp()).await {
            Ok(report) if report.requeued + report.deferred > 0 => info!(
                requeued = report.requeued,
                deferred = report.deferred,
                "Sweep pass complete"
            ),
            Ok(_) => {}
            Err(e) => error!("Sweep pass failed: {}", e),
        }
    }
}

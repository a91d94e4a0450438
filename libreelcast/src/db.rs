//! Database operations for Reelcast
//!
//! Every transition a post goes through after it has been scheduled is a
//! single conditional `UPDATE` guarded on the expected current status. The
//! number of affected rows tells the caller whether it won the transition;
//! no in-process locks are involved, so any number of engine instances can
//! share one database file.

use secrecy::{ExposeSecret, SecretString};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, Result};
use crate::types::{Account, FailureKind, PlatformKind, Post, PostStatus, RetryPolicy};

const POST_COLUMNS: &str = "id, platform, account_id, content, media_url, media_type, \
     scheduled_at, status, claimed_at, published_at, platform_post_id, error_message, \
     failure_kind, attempt_count, deferral_count, created_at, updated_at";

const ACCOUNT_COLUMNS: &str =
    "id, platform, username, remote_id, access_token, daily_count, last_count_date, created_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes keep the URL valid on Windows too
        let db_url = format!("sqlite://{}", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---------------------------------------------------------------------
    // Posts
    // ---------------------------------------------------------------------

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (
                id, platform, account_id, content, media_url, media_type,
                scheduled_at, status, attempt_count, deferral_count, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(post.platform.as_str())
        .bind(&post.account_id)
        .bind(&post.content)
        .bind(&post.media_url)
        .bind(post.media_type.as_str())
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(post.attempt_count)
        .bind(post.deferral_count)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// List posts, optionally filtered by status, soonest first.
    pub async fn list_posts(&self, status: Option<PostStatus>, limit: usize) -> Result<Vec<Post>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM posts WHERE status = ? \
                     ORDER BY scheduled_at IS NULL, scheduled_at ASC, created_at ASC LIMIT ?",
                    POST_COLUMNS
                ))
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM posts \
                     ORDER BY scheduled_at IS NULL, scheduled_at ASC, created_at ASC LIMIT ?",
                    POST_COLUMNS
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Scheduled posts whose time has come, oldest first.
    ///
    /// Read-only; claiming happens per post in [`Database::claim_post`].
    pub async fn query_due(&self, now: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts \
             WHERE status = 'scheduled' AND scheduled_at <= ? \
             ORDER BY scheduled_at ASC, created_at ASC",
            POST_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Scheduled posts due after `now` and no later than `until`.
    pub async fn query_upcoming(&self, now: i64, until: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts \
             WHERE status = 'scheduled' AND scheduled_at > ? AND scheduled_at <= ? \
             ORDER BY scheduled_at ASC",
            POST_COLUMNS
        ))
        .bind(now)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Atomically move a post from `scheduled` to `publishing`.
    ///
    /// Returns `None` when another worker got there first or the post is no
    /// longer scheduled.
    pub async fn claim_post(&self, post_id: &str, now: i64) -> Result<Option<Post>> {
        let row = sqlx::query(&format!(
            "UPDATE posts SET status = 'publishing', claimed_at = ?, updated_at = ? \
             WHERE id = ? AND status = 'scheduled' \
             RETURNING {}",
            POST_COLUMNS
        ))
        .bind(now)
        .bind(now)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// Record a successful publish. Returns false if the row was no longer
    /// in `publishing`.
    pub async fn mark_published(
        &self,
        post_id: &str,
        platform_post_id: &str,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'published', published_at = ?, platform_post_id = ?,
                error_message = NULL, failure_kind = NULL, updated_at = ?
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(now)
        .bind(platform_post_id)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a failed dispatch.
    ///
    /// Quota denials bump `deferral_count`; every other kind bumps
    /// `attempt_count`. Returns false if the row was no longer in
    /// `publishing`.
    pub async fn mark_failed(
        &self,
        post_id: &str,
        kind: FailureKind,
        message: &str,
        now: i64,
    ) -> Result<bool> {
        let (attempt_inc, deferral_inc) = match kind.retry_policy() {
            RetryPolicy::NextDay => (0, 1),
            _ => (1, 0),
        };

        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'failed', failure_kind = ?, error_message = ?,
                attempt_count = attempt_count + ?, deferral_count = deferral_count + ?,
                updated_at = ?
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(kind.as_str())
        .bind(message)
        .bind(attempt_inc)
        .bind(deferral_inc)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Failed posts with a backoff-retryable kind below the attempt ceiling.
    pub async fn query_failed_retryable(&self, max_attempts: i64) -> Result<Vec<Post>> {
        let kinds = FailureKind::backoff_kinds();
        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM posts \
             WHERE status = 'failed' AND failure_kind IN ({}) AND attempt_count < ? \
             ORDER BY updated_at ASC",
            POST_COLUMNS, placeholders
        );

        let mut query = sqlx::query(&sql);
        for kind in &kinds {
            query = query.bind(kind.as_str());
        }
        let rows = query
            .bind(max_attempts)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Quota-denied posts that may still be pushed to another day.
    pub async fn query_failed_deferred(&self, max_deferrals: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts \
             WHERE status = 'failed' AND failure_kind = ? AND deferral_count < ? \
             ORDER BY updated_at ASC",
            POST_COLUMNS
        ))
        .bind(FailureKind::DailyLimitReached.as_str())
        .bind(max_deferrals)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Move a failed post back to `scheduled`. Conditional on `failed` so two
    /// sweepers cannot both requeue the same row.
    pub async fn requeue_post(&self, post_id: &str, scheduled_at: i64, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'scheduled', scheduled_at = ?, claimed_at = NULL,
                failure_kind = NULL, updated_at = ?
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(scheduled_at)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Operator requeue: like [`Database::requeue_post`] but also clears the
    /// attempt and deferral counters, so terminal failures get a fresh budget.
    pub async fn reset_and_requeue_post(
        &self,
        post_id: &str,
        scheduled_at: i64,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'scheduled', scheduled_at = ?, claimed_at = NULL,
                failure_kind = NULL, error_message = NULL,
                attempt_count = 0, deferral_count = 0, updated_at = ?
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(scheduled_at)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Demote `publishing` rows claimed before `cutoff` to `failed`.
    ///
    /// Returns the ids that were demoted.
    pub async fn demote_stale_claims(&self, cutoff: i64, now: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'failed', failure_kind = ?,
                error_message = 'claim abandoned while publishing',
                attempt_count = attempt_count + 1, updated_at = ?
            WHERE status = 'publishing' AND claimed_at < ?
            RETURNING id
            "#,
        )
        .bind(FailureKind::StaleClaim.as_str())
        .bind(now)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// Move a scheduled post back to `draft`. Only possible before a worker
    /// has claimed it.
    pub async fn cancel_post(&self, post_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = 'draft', scheduled_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Give a draft a publication time, handing it to the engine.
    pub async fn schedule_draft(&self, post_id: &str, scheduled_at: i64, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = 'scheduled', scheduled_at = ?, updated_at = ?
            WHERE id = ? AND status = 'draft'
            "#,
        )
        .bind(scheduled_at)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn count_by_status(&self, status: PostStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(count)
    }

    pub async fn count_overdue(&self, now: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM posts WHERE status = 'scheduled' AND scheduled_at <= ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(count)
    }

    pub async fn count_published_since(&self, since: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM posts WHERE status = 'published' AND published_at >= ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(count)
    }

    /// Earliest scheduled time strictly after `now`.
    pub async fn next_scheduled_at(&self, now: i64) -> Result<Option<i64>> {
        let next: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(scheduled_at) FROM posts WHERE status = 'scheduled' AND scheduled_at > ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(next)
    }

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    pub async fn create_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, platform, username, remote_id, access_token,
                daily_count, last_count_date, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(account.platform.as_str())
        .bind(&account.username)
        .bind(&account.remote_id)
        .bind(account.access_token.expose_secret())
        .bind(account.daily_count)
        .bind(&account.last_count_date)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    /// Find an account on `platform` by id, username or remote id.
    pub async fn find_account(
        &self,
        platform: PlatformKind,
        reference: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts \
             WHERE platform = ? AND (id = ? OR username = ? OR remote_id = ?) \
             ORDER BY created_at ASC LIMIT 1",
            ACCOUNT_COLUMNS
        ))
        .bind(platform.as_str())
        .bind(reference)
        .bind(reference)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts ORDER BY platform, username",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    /// Replace an account's access token. Returns false if no such account.
    pub async fn update_account_token(&self, account_id: &str, token: &SecretString) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET access_token = ? WHERE id = ?")
            .bind(token.expose_secret())
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    // ---------------------------------------------------------------------
    // Activities
    // ---------------------------------------------------------------------

    pub async fn insert_activity(
        &self,
        event_type: &str,
        post_id: Option<&str>,
        account_id: Option<&str>,
        description: &str,
        metadata: Option<&str>,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activities (event_type, post_id, account_id, description, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event_type)
        .bind(post_id)
        .bind(account_id)
        .bind(description)
        .bind(metadata)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Activity rows for a post as `(event_type, description)`, oldest first.
    pub async fn activities_for_post(&self, post_id: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT event_type, description FROM activities WHERE post_id = ? ORDER BY id ASC",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows)
    }
}

fn corrupt(table: &'static str, reason: String) -> DbError {
    DbError::CorruptRow { table, reason }
}

fn post_from_row(r: &SqliteRow) -> Result<Post> {
    let platform: String = r.get("platform");
    let media_type: String = r.get("media_type");
    let status: String = r.get("status");
    let failure_kind: Option<String> = r.get("failure_kind");

    Ok(Post {
        id: r.get("id"),
        platform: platform.parse().map_err(|e| corrupt("posts", e))?,
        account_id: r.get("account_id"),
        content: r.get("content"),
        media_url: r.get("media_url"),
        media_type: media_type.parse().map_err(|e| corrupt("posts", e))?,
        scheduled_at: r.get("scheduled_at"),
        status: status.parse().map_err(|e| corrupt("posts", e))?,
        claimed_at: r.get("claimed_at"),
        published_at: r.get("published_at"),
        platform_post_id: r.get("platform_post_id"),
        error_message: r.get("error_message"),
        failure_kind: failure_kind
            .map(|k| k.parse::<FailureKind>())
            .transpose()
            .map_err(|e| corrupt("posts", e))?,
        attempt_count: r.get("attempt_count"),
        deferral_count: r.get("deferral_count"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn account_from_row(r: &SqliteRow) -> Result<Account> {
    let platform: String = r.get("platform");
    let token: String = r.get("access_token");

    Ok(Account {
        id: r.get("id"),
        platform: platform.parse().map_err(|e| corrupt("accounts", e))?,
        username: r.get("username"),
        remote_id: r.get("remote_id"),
        access_token: SecretString::from(token),
        daily_count: r.get("daily_count"),
        last_count_date: r.get("last_count_date"),
        created_at: r.get("created_at"),
    })
}

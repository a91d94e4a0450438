//! Per-account daily publish quota
//!
//! The counter lives on the account row (`daily_count`, `last_count_date`) so
//! every engine instance sharing the database enforces the same limit. The
//! counter for a new UTC day is reset lazily by whichever caller touches the
//! account first.

use crate::config::QuotaConfig;
use crate::error::{DbError, Result};
use crate::types::{Account, PlatformKind, QuotaCheck};
use crate::Database;

pub struct RateLimiter {
    config: QuotaConfig,
}

impl RateLimiter {
    pub fn new(config: QuotaConfig) -> Self {
        Self { config }
    }

    pub fn limit_for(&self, platform: PlatformKind) -> i64 {
        self.config.limit_for(platform)
    }

    /// Decide whether the account may publish once more on `today`
    /// (`YYYY-MM-DD`, UTC).
    ///
    /// Idempotent apart from the date rollover, which only ever zeroes a
    /// counter that belongs to an earlier day.
    pub async fn can_publish(&self, db: &Database, account: &Account, today: &str) -> Result<QuotaCheck> {
        reset_if_new_day(db, &account.id, today).await?;
        let count_today = current_count(db, &account.id).await?;
        let limit = self.limit_for(account.platform);

        Ok(QuotaCheck {
            allowed: count_today < limit,
            count_today,
            limit,
        })
    }

    /// Count one successful publish against the account. Call only after the
    /// remote platform confirmed the post.
    pub async fn record_success(&self, db: &Database, account_id: &str, today: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET daily_count = CASE WHEN last_count_date = ? THEN daily_count + 1 ELSE 1 END,
                last_count_date = ?
            WHERE id = ?
            "#,
        )
        .bind(today)
        .bind(today)
        .bind(account_id)
        .execute(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Today's usage without touching the stored counter.
    pub fn usage(&self, account: &Account, today: &str) -> QuotaCheck {
        let count_today = if account.last_count_date.as_deref() == Some(today) {
            account.daily_count
        } else {
            0
        };
        let limit = self.limit_for(account.platform);

        QuotaCheck {
            allowed: count_today < limit,
            count_today,
            limit,
        }
    }
}

async fn reset_if_new_day(db: &Database, account_id: &str, today: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE accounts SET daily_count = 0, last_count_date = ?
        WHERE id = ? AND (last_count_date IS NULL OR last_count_date <> ?)
        "#,
    )
    .bind(today)
    .bind(account_id)
    .bind(today)
    .execute(db.pool())
    .await
    .map_err(DbError::SqlxError)?;

    Ok(())
}

async fn current_count(db: &Database, account_id: &str) -> Result<i64> {
    let row = sqlx::query_as::<_, (i64,)>("SELECT daily_count FROM accounts WHERE id = ?")
        .bind(account_id)
        .fetch_optional(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

    Ok(row.map(|r| r.0).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const TODAY: &str = "2025-06-01";
    const TOMORROW: &str = "2025-06-02";

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        (temp_dir, db)
    }

    async fn seed_account(db: &Database, platform: PlatformKind, remote_id: &str) -> Account {
        let account = Account::new(
            platform,
            format!("user_{}", remote_id),
            remote_id.to_string(),
            SecretString::from("token"),
            0,
        );
        db.create_account(&account).await.unwrap();
        account
    }

    fn limiter_with(limit: i64) -> RateLimiter {
        RateLimiter::new(QuotaConfig {
            daily_limit: limit,
            platform_limits: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn test_allows_first_post() {
        let (_temp, db) = setup_test_db().await;
        let account = seed_account(&db, PlatformKind::Instagram, "1").await;
        let limiter = RateLimiter::new(QuotaConfig::default());

        let check = limiter.can_publish(&db, &account, TODAY).await.unwrap();
        assert_eq!(
            check,
            QuotaCheck {
                allowed: true,
                count_today: 0,
                limit: 25
            }
        );
    }

    #[tokio::test]
    async fn test_blocks_at_limit() {
        let (_temp, db) = setup_test_db().await;
        let account = seed_account(&db, PlatformKind::Instagram, "1").await;
        let limiter = limiter_with(3);

        for i in 0..3 {
            let check = limiter.can_publish(&db, &account, TODAY).await.unwrap();
            assert!(check.allowed, "publish {} should be allowed", i + 1);
            limiter.record_success(&db, &account.id, TODAY).await.unwrap();
        }

        let check = limiter.can_publish(&db, &account, TODAY).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.count_today, 3);
    }

    #[tokio::test]
    async fn test_can_publish_is_idempotent() {
        let (_temp, db) = setup_test_db().await;
        let account = seed_account(&db, PlatformKind::Facebook, "1").await;
        let limiter = limiter_with(5);
        limiter.record_success(&db, &account.id, TODAY).await.unwrap();

        let first = limiter.can_publish(&db, &account, TODAY).await.unwrap();
        let second = limiter.can_publish(&db, &account, TODAY).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.count_today, 1);
    }

    #[tokio::test]
    async fn test_resets_on_new_day() {
        let (_temp, db) = setup_test_db().await;
        let account = seed_account(&db, PlatformKind::Instagram, "1").await;
        let limiter = limiter_with(2);

        limiter.record_success(&db, &account.id, TODAY).await.unwrap();
        limiter.record_success(&db, &account.id, TODAY).await.unwrap();
        assert!(!limiter.can_publish(&db, &account, TODAY).await.unwrap().allowed);

        let check = limiter.can_publish(&db, &account, TOMORROW).await.unwrap();
        assert!(check.allowed);
        assert_eq!(check.count_today, 0);
    }

    #[tokio::test]
    async fn test_record_success_after_rollover_starts_at_one() {
        let (_temp, db) = setup_test_db().await;
        let account = seed_account(&db, PlatformKind::Instagram, "1").await;
        let limiter = limiter_with(25);

        limiter.record_success(&db, &account.id, TODAY).await.unwrap();
        limiter.record_success(&db, &account.id, TOMORROW).await.unwrap();

        let loaded = db.get_account(&account.id).await.unwrap().unwrap();
        assert_eq!(loaded.daily_count, 1);
        assert_eq!(loaded.last_count_date.as_deref(), Some(TOMORROW));
    }

    #[tokio::test]
    async fn test_independent_accounts() {
        let (_temp, db) = setup_test_db().await;
        let a = seed_account(&db, PlatformKind::Instagram, "1").await;
        let b = seed_account(&db, PlatformKind::Instagram, "2").await;
        let limiter = limiter_with(1);

        limiter.record_success(&db, &a.id, TODAY).await.unwrap();
        assert!(!limiter.can_publish(&db, &a, TODAY).await.unwrap().allowed);
        assert!(limiter.can_publish(&db, &b, TODAY).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_platform_override() {
        let (_temp, db) = setup_test_db().await;
        let ig = seed_account(&db, PlatformKind::Instagram, "1").await;
        let fb = seed_account(&db, PlatformKind::Facebook, "2").await;

        let mut platform_limits = HashMap::new();
        platform_limits.insert(PlatformKind::Facebook, 50);
        let limiter = RateLimiter::new(QuotaConfig {
            daily_limit: 25,
            platform_limits,
        });

        assert_eq!(limiter.can_publish(&db, &ig, TODAY).await.unwrap().limit, 25);
        assert_eq!(limiter.can_publish(&db, &fb, TODAY).await.unwrap().limit, 50);
    }

    #[test]
    fn test_usage_ignores_stale_counter() {
        let mut account = Account::new(
            PlatformKind::Instagram,
            "x".to_string(),
            "1".to_string(),
            SecretString::from("t"),
            0,
        );
        account.daily_count = 25;
        account.last_count_date = Some(TODAY.to_string());

        let limiter = limiter_with(25);
        assert!(!limiter.usage(&account, TODAY).allowed);
        assert_eq!(limiter.usage(&account, TOMORROW).count_today, 0);
    }
}

//! Integration tests for the reel-send daemon

use assert_cmd::Command;
use libreelcast::types::{Account, MediaType, NewPost, PlatformKind, Post};
use libreelcast::{Database, PostStatus};
use predicates::prelude::*;
use secrecy::SecretString;
use std::fs;
use tempfile::TempDir;

/// Escape a path for embedding in TOML
fn toml_path(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Config pointing at a temp database and a Graph endpoint that refuses
/// connections, so publishing fails fast with a network error.
async fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[scheduling]
poll_interval_secs = 1
max_attempts = 3

[platforms]
graph_base_url = "http://127.0.0.1:9"
request_timeout_secs = 5
"#,
        toml_path(&db_path)
    );
    fs::write(&config_path, config_content).unwrap();

    let _db = Database::new(db_path.to_str().unwrap()).await.unwrap();

    (
        temp_dir,
        config_path.to_string_lossy().to_string(),
        db_path.to_string_lossy().to_string(),
    )
}

async fn create_post(db_path: &str, offset_secs: i64) -> String {
    let db = Database::new(db_path).await.unwrap();
    let now = chrono::Utc::now().timestamp();

    let account = Account::new(
        PlatformKind::Facebook,
        "bakery-page".to_string(),
        format!("page-{}", offset_secs),
        SecretString::from("token"),
        now,
    );
    db.create_account(&account).await.unwrap();

    let post = Post::from_new(
        NewPost {
            platform: PlatformKind::Facebook,
            account_id: account.id,
            content: "Open until 6pm today".to_string(),
            media_url: None,
            media_type: MediaType::Photo,
            scheduled_at: Some(now + offset_secs),
        },
        now - 60,
    );
    db.create_post(&post).await.unwrap();
    post.id
}

fn reel_send(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("reel-send").unwrap();
    cmd.env("REELCAST_CONFIG", config_path)
        .env_remove("RUST_LOG")
        .env_remove("REELCAST_LOG_LEVEL")
        .env_remove("REELCAST_LOG_FORMAT")
        .env_remove("REELCAST_DB_PATH");
    cmd
}

#[tokio::test]
async fn test_once_flag_exits_immediately() {
    let (_temp_dir, config_path, _db_path) = setup_test_env().await;

    reel_send(&config_path)
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("reel-send daemon starting"))
        .stderr(predicate::str::contains("processed posts once, exiting"));
}

#[tokio::test]
async fn test_invalid_config_fails_with_config_exit_code() {
    let temp_dir = TempDir::new().unwrap();
    let invalid_config = temp_dir.path().join("invalid.toml");
    fs::write(&invalid_config, "invalid toml content [[[").unwrap();

    reel_send(invalid_config.to_str().unwrap())
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[tokio::test]
async fn test_missing_explicit_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    reel_send(missing.to_str().unwrap())
        .arg("--once")
        .assert()
        .code(2);
}

#[tokio::test]
async fn test_custom_poll_interval() {
    let (_temp_dir, config_path, _db_path) = setup_test_env().await;

    reel_send(&config_path)
        .args(["--once", "--poll-interval", "30"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Poll interval: 30s"));
}

#[tokio::test]
async fn test_json_log_format() {
    let (_temp_dir, config_path, _db_path) = setup_test_env().await;

    reel_send(&config_path)
        .args(["--once", "--log-format", "json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("\"message\":\"reel-send daemon starting\""));
}

#[tokio::test]
async fn test_due_post_fails_then_is_requeued() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_post(&db_path, -10).await;
    let before = chrono::Utc::now().timestamp();

    reel_send(&config_path)
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("Found 1 post(s) due for publishing"));

    // The scan fails it with a network error, the sweep that follows puts
    // it back on the schedule with the attempt counted.
    let db = Database::new(&db_path).await.unwrap();
    let post = db.get_post(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
    assert_eq!(post.attempt_count, 1);
    assert!(post.scheduled_at.unwrap() > before);
    assert!(post.error_message.is_some());

    let events: Vec<String> = db
        .activities_for_post(&post_id)
        .await
        .unwrap()
        .into_iter()
        .map(|(event_type, _)| event_type)
        .collect();
    assert!(events.contains(&"post_failed".to_string()));
    assert!(events.contains(&"post_requeued".to_string()));
}

#[tokio::test]
async fn test_future_post_left_alone() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_post(&db_path, 3600).await;

    reel_send(&config_path).arg("--once").assert().success();

    let db = Database::new(&db_path).await.unwrap();
    let post = db.get_post(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
    assert_eq!(post.attempt_count, 0);
}

#[tokio::test]
async fn test_db_path_env_override() {
    let (temp_dir, config_path, _db_path) = setup_test_env().await;
    let other_db = temp_dir.path().join("other.db");

    reel_send(&config_path)
        .env("REELCAST_DB_PATH", other_db.to_str().unwrap())
        .arg("--once")
        .assert()
        .success();

    assert!(other_db.exists());
}

//! Shared setup for reel-queue integration tests

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_path: String,
    pub db_path: String,
}

impl TestEnv {
    /// Config with a temp database and a Graph endpoint that refuses
    /// connections.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let db_path = temp_dir.path().join("posts.db");

        let config_content = format!(
            r#"
[database]
path = "{}"

[platforms]
graph_base_url = "http://127.0.0.1:9"
request_timeout_secs = 5
"#,
            db_path.to_string_lossy().replace('\\', "/")
        );
        fs::write(&config_path, config_content).unwrap();

        Self {
            config_path: config_path.to_string_lossy().to_string(),
            db_path: db_path.to_string_lossy().to_string(),
            temp_dir,
        }
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("reel-queue").unwrap();
        cmd.env("REELCAST_CONFIG", &self.config_path)
            .env_remove("REELCAST_DB_PATH")
            .env_remove("REELCAST_ACCESS_TOKEN")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Run a command that must succeed and return its trimmed stdout.
    pub fn run(&self, args: &[&str]) -> String {
        let output = self.cmd().args(args).assert().success().get_output().clone();
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    pub fn add_account(&self, platform: &str, username: &str, remote_id: &str) -> String {
        self.run(&[
            "account",
            "add",
            "--platform",
            platform,
            "--username",
            username,
            "--remote-id",
            remote_id,
            "--token",
            "test-token",
        ])
    }

    /// Schedule a Facebook text post two hours out and return its id.
    pub fn add_facebook_post(&self, account: &str, content: &str) -> String {
        self.run(&[
            "add",
            content,
            "--platform",
            "facebook",
            "--account",
            account,
            "--at",
            "2h",
        ])
    }
}

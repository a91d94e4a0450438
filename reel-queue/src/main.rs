//! reel-queue - Manage scheduled posts
//!
//! Operator tool for the Reelcast queue: register accounts, schedule posts,
//! inspect the queue and force a publishing pass.

use chrono::FixedOffset;
use clap::{Parser, Subcommand};
use libreelcast::logging::{LogFormat, LoggingConfig};
use libreelcast::scheduling::{format_timestamp, now_timestamp, parse_schedule};
use libreelcast::{
    Config, MediaType, NewPost, PlatformError, PlatformKind, Post, PostStatus, ReelcastError,
    Result, Scheduler,
};
use secrecy::SecretString;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "reel-queue")]
#[command(version)]
#[command(about = "Manage scheduled Facebook and Instagram posts")]
#[command(long_about = "\
reel-queue - Manage scheduled posts

DESCRIPTION:
    reel-queue manages the Reelcast publishing queue. Use it to register
    accounts, schedule posts, inspect the queue, requeue failed posts and
    force an immediate publishing pass.

    Scheduled posts are published by the reel-send daemon.

COMMANDS:
    account     Add, list or update platform accounts
    add         Create a post (scheduled, immediate or draft)
    list        List posts, optionally filtered by status
    cancel      Move a scheduled post back to draft
    requeue     Reset a failed post and schedule it again
    schedule    Give a draft a publication time
    stats       Show queue statistics and daily usage per account
    scan        Publish everything that is due right now

USAGE EXAMPLES:
    # Register an Instagram business account
    REELCAST_ACCESS_TOKEN=... reel-queue account add --platform instagram \\
        --username bakery --remote-id 17841400000000000

    # Schedule a reel for tomorrow afternoon
    reel-queue add \"Fresh bread\" --platform instagram --account bakery \\
        --media-url https://cdn.example.com/bread.mp4 --media-type reel \\
        --at \"tomorrow 3pm\"

    # Publish right away
    reel-queue add \"Open today\" --platform facebook --account bakery-page --now

    # Failed posts as JSON
    reel-queue list --status failed --format json

TIME FORMATS (--at):
    2025-06-01T15:00:00+02:00   RFC 3339
    2025-06-01 15:00            in scheduling.input_utc_offset
    2h, 30m, 1day               relative to now
    tomorrow 3pm                natural language

CONFIGURATION:
    Configuration file: ~/.config/reelcast/config.toml
    Database location: ~/.local/share/reelcast/posts.db

    Override with environment variables:
        REELCAST_CONFIG    - Path to config file
        REELCAST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Publishing failed
    2 - Database, configuration or credential error
    3 - Invalid input (unknown post or account, bad time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format: text, json or pretty
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage platform accounts
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Create a post
    Add {
        /// Caption or message text
        #[arg(default_value = "")]
        content: String,

        /// Target platform: facebook or instagram
        #[arg(short, long)]
        platform: PlatformKind,

        /// Account id, username or remote id
        #[arg(short, long)]
        account: String,

        /// Publicly reachable media URL
        #[arg(long)]
        media_url: Option<String>,

        /// photo, video or reel
        #[arg(long, default_value = "photo")]
        media_type: MediaType,

        /// Publication time (e.g. "tomorrow 3pm", "2h", RFC 3339)
        #[arg(long, conflicts_with = "now")]
        at: Option<String>,

        /// Publish immediately instead of scheduling
        #[arg(long)]
        now: bool,
    },

    /// List posts
    List {
        /// Only show posts with this status
        #[arg(short, long)]
        status: Option<PostStatus>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Maximum number of posts to show
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Move a scheduled post back to draft
    Cancel {
        /// Post ID to cancel
        post_id: String,
    },

    /// Reset a failed post and schedule it again
    Requeue {
        /// Post ID to requeue
        post_id: String,

        /// New publication time (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Schedule a draft
    Schedule {
        /// Draft post ID
        post_id: String,

        /// Publication time
        #[arg(long)]
        at: String,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Publish everything that is due now
    Scan,
}

#[derive(Subcommand, Debug)]
enum AccountCommands {
    /// Register an account
    Add {
        #[arg(short, long)]
        platform: PlatformKind,

        /// Display name used to refer to the account
        #[arg(short, long)]
        username: String,

        /// Facebook page id or Instagram business account id
        #[arg(long)]
        remote_id: String,

        /// Graph API access token
        #[arg(long, env = "REELCAST_ACCESS_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// List accounts with today's usage
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replace an account's access token
    Token {
        /// Account id
        account_id: String,

        #[arg(long, env = "REELCAST_ACCESS_TOKEN", hide_env_values = true)]
        token: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Run the main logic and handle errors
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    init_logging(&config, cli.log_format, cli.verbose);

    let offset = config.scheduling.utc_offset()?;
    let scheduler = Scheduler::from_config(config).await?;
    let now = now_timestamp();

    match cli.command {
        Commands::Account { command } => cmd_account(&scheduler, command, now).await?,
        Commands::Add {
            content,
            platform,
            account,
            media_url,
            media_type,
            at,
            now: immediate,
        } => {
            let scheduled_at = match (immediate, at) {
                (true, _) => Some(now),
                (false, Some(at)) => Some(parse_schedule(&at, now, offset)?),
                (false, None) => None,
            };
            cmd_add(
                &scheduler,
                AddArgs {
                    content,
                    platform,
                    account,
                    media_url,
                    media_type,
                    scheduled_at,
                    immediate,
                },
                now,
            )
            .await?
        }
        Commands::List {
            status,
            format,
            limit,
        } => cmd_list(&scheduler, status, &format, limit, offset).await?,
        Commands::Cancel { post_id } => {
            scheduler.cancel_post(&post_id, now).await?;
            println!("Cancelled {}", post_id);
        }
        Commands::Requeue { post_id, at } => {
            let at = match at {
                Some(at) => parse_schedule(&at, now, offset)?,
                None => now,
            };
            scheduler.requeue_post(&post_id, at, now).await?;
            println!("Requeued {} for {}", post_id, format_timestamp(at, offset));
        }
        Commands::Schedule { post_id, at } => {
            let at = parse_schedule(&at, now, offset)?;
            scheduler.schedule_draft(&post_id, at, now).await?;
            println!("Scheduled {} for {}", post_id, format_timestamp(at, offset));
        }
        Commands::Stats { format } => cmd_stats(&scheduler, &format, now, offset).await?,
        Commands::Scan => {
            let report = scheduler.run_scan(now).await?;
            println!(
                "due: {}, published: {}, failed: {}, skipped: {}, upcoming: {}",
                report.due, report.published, report.failed, report.skipped, report.upcoming
            );
        }
    }

    Ok(())
}

/// Operator commands stay quiet unless asked otherwise.
fn init_logging(config: &Config, cli_format: Option<LogFormat>, verbose: bool) {
    let mut section = config.logging.clone();
    section.level = "warn".to_string();
    LoggingConfig::resolve(&section, cli_format, verbose).init();
}

fn check_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(ReelcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ReelcastError::InvalidInput(format!("Failed to encode JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}

async fn cmd_account(scheduler: &Scheduler, command: AccountCommands, now: i64) -> Result<()> {
    match command {
        AccountCommands::Add {
            platform,
            username,
            remote_id,
            token,
        } => {
            let account = scheduler
                .add_account(platform, &username, &remote_id, SecretString::from(token), now)
                .await?;
            println!("{}", account.id);
        }
        AccountCommands::List { format } => {
            check_format(&format)?;
            let stats = scheduler.stats(now).await?;
            if format == "json" {
                print_json(&stats.per_account_usage)?;
            } else {
                for usage in &stats.per_account_usage {
                    println!(
                        "{} | {} | {} | {}/{} today",
                        usage.account_id,
                        usage.platform,
                        usage.username,
                        usage.count_today,
                        usage.limit
                    );
                }
            }
        }
        AccountCommands::Token { account_id, token } => {
            let updated = scheduler
                .database()
                .update_account_token(&account_id, &SecretString::from(token))
                .await?;
            if !updated {
                return Err(ReelcastError::NotFound(format!("account {}", account_id)));
            }
            println!("Updated token for {}", account_id);
        }
    }
    Ok(())
}

struct AddArgs {
    content: String,
    platform: PlatformKind,
    account: String,
    media_url: Option<String>,
    media_type: MediaType,
    scheduled_at: Option<i64>,
    immediate: bool,
}

/// Create a post; with `--now`, also run a scan pass and report the outcome.
async fn cmd_add(scheduler: &Scheduler, args: AddArgs, now: i64) -> Result<()> {
    let account = scheduler
        .database()
        .find_account(args.platform, &args.account)
        .await?
        .ok_or_else(|| {
            ReelcastError::NotFound(format!("{} account {}", args.platform, args.account))
        })?;

    let post = scheduler
        .create_post(
            NewPost {
                platform: args.platform,
                account_id: account.id,
                content: args.content,
                media_url: args.media_url,
                media_type: args.media_type,
                scheduled_at: args.scheduled_at,
            },
            now,
        )
        .await?;

    if !args.immediate {
        println!("{}", post.id);
        return Ok(());
    }

    scheduler.run_scan(now).await?;
    let post = scheduler
        .database()
        .get_post(&post.id)
        .await?
        .ok_or_else(|| ReelcastError::NotFound(format!("post {}", post.id)))?;

    match post.status {
        PostStatus::Published => {
            println!(
                "{} {}",
                post.id,
                post.platform_post_id.as_deref().unwrap_or_default()
            );
            Ok(())
        }
        _ => {
            println!("{}", post.id);
            let kind = post
                .failure_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| post.status.to_string());
            Err(PlatformError::Publishing(format!(
                "{}: {}",
                kind,
                post.error_message.unwrap_or_default()
            ))
            .into())
        }
    }
}

async fn cmd_list(
    scheduler: &Scheduler,
    status: Option<PostStatus>,
    format: &str,
    limit: usize,
    offset: FixedOffset,
) -> Result<()> {
    check_format(format)?;
    let posts = scheduler.database().list_posts(status, limit).await?;

    if format == "json" {
        return print_json(&posts);
    }

    for post in &posts {
        println!("{}", format_post_line(post, offset));
    }
    Ok(())
}

fn format_post_line(post: &Post, offset: FixedOffset) -> String {
    let when = post
        .scheduled_at
        .map(|ts| format_timestamp(ts, offset))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{} | {} | {} | {} | {}",
        post.id,
        post.platform,
        post.status,
        when,
        truncate_content(&post.content, 40)
    );
    if let (PostStatus::Failed, Some(kind)) = (post.status, post.failure_kind) {
        line.push_str(&format!(" | {} (attempts: {})", kind, post.attempt_count));
    }
    line
}

/// Truncate content to max characters with ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let cut: String = single_line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

async fn cmd_stats(
    scheduler: &Scheduler,
    format: &str,
    now: i64,
    offset: FixedOffset,
) -> Result<()> {
    check_format(format)?;
    let stats = scheduler.stats(now).await?;

    if format == "json" {
        return print_json(&stats);
    }

    println!("Scheduled:        {}", stats.scheduled_count);
    println!("Overdue:          {}", stats.overdue_count);
    println!("Publishing:       {}", stats.publishing_count);
    println!("Failed:           {}", stats.failed_count);
    println!("Published today:  {}", stats.published_today_count);
    println!(
        "Next scheduled:   {}",
        stats
            .next_scheduled_at
            .map(|ts| format_timestamp(ts, offset))
            .unwrap_or_else(|| "none".to_string())
    );
    if !stats.per_account_usage.is_empty() {
        println!("Daily usage:");
        for usage in &stats.per_account_usage {
            println!(
                "  {} {}: {}/{}",
                usage.platform, usage.username, usage.count_today, usage.limit
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short", 10), "short");
        assert_eq!(truncate_content("line one\nline two", 40), "line one line two");
        assert_eq!(truncate_content("ééééé", 3), "ééé...");
    }

    #[test]
    fn test_check_format() {
        assert!(check_format("text").is_ok());
        assert!(check_format("json").is_ok());
        assert!(matches!(
            check_format("yaml"),
            Err(ReelcastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cli_parses_add() {
        let cli = Cli::try_parse_from([
            "reel-queue",
            "add",
            "Fresh bread",
            "--platform",
            "ig",
            "--account",
            "bakery",
            "--media-url",
            "https://cdn.example.com/a.mp4",
            "--media-type",
            "reel",
            "--at",
            "2h",
        ])
        .unwrap();
        match cli.command {
            Commands::Add {
                platform,
                media_type,
                at,
                now,
                ..
            } => {
                assert_eq!(platform, PlatformKind::Instagram);
                assert_eq!(media_type, MediaType::Reel);
                assert_eq!(at.as_deref(), Some("2h"));
                assert!(!now);
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_cli_rejects_at_with_now() {
        let result = Cli::try_parse_from([
            "reel-queue",
            "add",
            "x",
            "--platform",
            "facebook",
            "--account",
            "page",
            "--at",
            "2h",
            "--now",
        ]);
        assert!(result.is_err());
    }
}

//! reel-send - Background daemon for scheduled publishing
//!
//! Scans the queue for due posts, publishes them, requeues retryable
//! failures and recovers abandoned claims until told to stop.

use clap::Parser;
use libreelcast::logging::{LogFormat, LoggingConfig};
use libreelcast::scheduling::now_timestamp;
use libreelcast::{Config, Result, Scheduler, SchedulerHandle};
use tokio::sync::oneshot;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "reel-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled publishing")]
#[command(long_about = "\
reel-send - Background daemon for scheduled publishing

DESCRIPTION:
    reel-send is a long-running daemon that publishes scheduled Facebook
    and Instagram posts when they come due.

    Every poll interval it claims due posts and publishes them, respecting
    each account's daily limit. Transient failures are retried on the
    retry interval; posts denied by the daily limit move to the next day.
    Several reel-send processes may share one database: each post is
    claimed by exactly one of them.

USAGE:
    # Run in foreground (logs to stderr)
    reel-send

    # Poll every 10 seconds with JSON logs
    reel-send --poll-interval 10 --log-format json

    # Process due posts once and exit
    reel-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes posts in flight)
    SIGUSR1         - Scan for due posts immediately

CONFIGURATION:
    Configuration file: ~/.config/reelcast/config.toml
    Database location: ~/.local/share/reelcast/posts.db

    [scheduling]
    poll_interval_secs = 30      # seconds between scans
    retry_interval_secs = 14400  # seconds between retry sweeps
    max_attempts = 3             # attempts before a failure is final
    workers = 4                  # accounts served concurrently
    publish_timeout_secs = 300   # per post, below stale_after_secs

    [quota]
    daily_limit = 25             # posts per account per UTC day

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Process due posts once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    LoggingConfig::resolve(&config.logging, cli.log_format, cli.verbose).init();

    if let Some(secs) = cli.poll_interval {
        config.scheduling.poll_interval_secs = secs.max(1);
    }

    info!("reel-send daemon starting");
    info!("Poll interval: {}s", config.scheduling.poll_interval_secs);

    let scheduler = Scheduler::from_config(config).await?;

    if cli.once {
        let now = now_timestamp();
        scheduler.run_scan(now).await?;
        scheduler.run_sweep(now).await?;
        info!("reel-send: processed posts once, exiting");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let signals = spawn_signal_handler(scheduler.handle(), shutdown_tx)?;

    scheduler
        .run(async move {
            let _ = shutdown_rx.await;
        })
        .await?;

    signals.close();
    info!("reel-send daemon stopped");
    Ok(())
}

#[cfg(unix)]
struct SignalTask {
    handle: signal_hook_tokio::Handle,
    task: tokio::task::JoinHandle<()>,
}

#[cfg(unix)]
impl SignalTask {
    fn close(self) {
        self.handle.close();
        self.task.abort();
    }
}

/// SIGINT/SIGTERM request shutdown, SIGUSR1 requests an immediate scan.
#[cfg(unix)]
fn spawn_signal_handler(
    scheduler: SchedulerHandle,
    shutdown: oneshot::Sender<()>,
) -> Result<SignalTask> {
    use futures::stream::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGUSR1]).map_err(|e| {
        libreelcast::ReelcastError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;
    let handle = signals.handle();

    let task = tokio::spawn(async move {
        let mut shutdown = Some(shutdown);
        while let Some(signal) = signals.next().await {
            match signal {
                SIGUSR1 => {
                    info!("Received SIGUSR1, scanning now");
                    scheduler.trigger_scan();
                }
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    if let Some(tx) = shutdown.take() {
                        let _ = tx.send(());
                    }
                }
                _ => {}
            }
        }
    });

    Ok(SignalTask { handle, task })
}

#[cfg(not(unix))]
struct SignalTask {
    task: tokio::task::JoinHandle<()>,
}

#[cfg(not(unix))]
impl SignalTask {
    fn close(self) {
        self.task.abort();
    }
}

#[cfg(not(unix))]
fn spawn_signal_handler(
    _scheduler: SchedulerHandle,
    shutdown: oneshot::Sender<()>,
) -> Result<SignalTask> {
    let task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            let _ = shutdown.send(());
        }
    });
    Ok(SignalTask { task })
}

mod activity;
mod config;
mod engine;
mod notifier;
mod selector;
mod state;
mod timestamp;

use clap::Parser;
use config::IdleNotifyConfig;
use engine::{Decision, IdleChecker};
use notifier::CommandNotifier;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Check an agent's log for recent activity and send one notification when it
/// has been idle too long. Meant to be run periodically by cron or launchd.
#[derive(Parser, Debug)]
#[command(name = "idle-notify", version, about)]
pub struct Cli {
    /// Config file path (optional; missing file means defaults)
    #[arg(short, long, default_value = "idle-notify.toml")]
    config: PathBuf,

    /// Idle threshold in minutes (overrides config and IDLE_NOTIFY_MINUTES)
    #[arg(long, value_name = "MINUTES")]
    threshold: Option<u64>,

    /// Log file glob (overrides config and IDLE_NOTIFY_LOG_GLOB)
    #[arg(long, value_name = "PATTERN")]
    log_glob: Option<String>,

    /// State file path (overrides config and IDLE_NOTIFY_STATE)
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,

    /// Print resolved settings and exit without checking
    #[arg(long)]
    dry_run: bool,

    /// Print last activity, idle time and persisted state, then exit
    #[arg(long, conflicts_with = "dry_run")]
    status: bool,

    /// Debug logging (scan results, decisions)
    #[arg(short, long)]
    verbose: bool,
}

/// Build the effective config: file, then environment, then CLI flags.
fn resolve_config(cli: &Cli) -> Result<IdleNotifyConfig, config::ConfigError> {
    let mut cfg = IdleNotifyConfig::load(&cli.config)?;
    cfg.apply_env()?;
    apply_cli_overrides(&mut cfg, cli);
    cfg.expand_paths();
    Ok(cfg)
}

fn apply_cli_overrides(cfg: &mut IdleNotifyConfig, cli: &Cli) {
    if let Some(mins) = cli.threshold {
        cfg.idle.threshold_mins = mins;
    }
    if let Some(glob) = &cli.log_glob {
        cfg.log.glob = glob.clone();
    }
    if let Some(path) = &cli.state {
        cfg.state.path = path.clone();
    }
}

fn print_settings(cfg: &IdleNotifyConfig) {
    println!("idle-notify v{}", env!("CARGO_PKG_VERSION"));
    println!("  log glob:        {}", cfg.log.glob);
    println!("  state file:      {}", cfg.state.path.display());
    println!("  idle threshold:  {} min", cfg.idle.threshold_mins);
    println!("  check interval:  {} s (scheduler hint)", cfg.idle.check_interval_secs);
    println!("  tail window:     {} bytes, {} lines", cfg.log.tail_bytes, cfg.log.max_lines);
    println!("  noise:           {:?}", cfg.log.noise_substrings);
    println!("  markers:         {:?}", cfg.log.activity_markers);
    println!(
        "  notify:          {} send --to {} --service {}",
        cfg.notify.command, cfg.notify.recipient, cfg.notify.service
    );
}

fn print_status(checker: &IdleChecker, now: f64) {
    let Some(report) = checker.status(now) else {
        println!("No active log.");
        return;
    };
    let state = report.state;
    println!("log:             {}", report.log_path.display());
    println!("state file:      {}", checker.store().path().display());
    println!(
        "last activity:   {} ({:?})",
        timestamp::format_epoch(report.last_ts),
        report.source
    );
    println!(
        "idle:            {} min (threshold {} min)",
        (report.idle_secs / 60.0).floor() as i64,
        (report.threshold_secs / 60.0) as u64
    );
    println!(
        "last seen:       {}",
        timestamp::format_epoch(state.last_seen_activity_ts)
    );
    println!(
        "last notified:   {} (for activity at {})",
        timestamp::format_epoch(state.last_notified_at),
        timestamp::format_epoch(state.last_notified_activity_ts)
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let cfg = match resolve_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if cli.dry_run {
        print_settings(&cfg);
        return ExitCode::SUCCESS;
    }

    let checker = IdleChecker::from_config(&cfg);
    let now = timestamp::now_epoch();

    if cli.status {
        print_status(&checker, now);
        return ExitCode::SUCCESS;
    }

    let notifier = CommandNotifier::from_config(&cfg.notify);
    match checker.run(&notifier, now).await {
        Ok(decision) => {
            match decision {
                Decision::Notified { last_ts, idle_secs } => tracing::info!(
                    last_activity = %timestamp::format_epoch(last_ts),
                    idle_mins = (idle_secs / 60.0).floor(),
                    "agent idle, notified"
                ),
                Decision::AdvancedSeen { last_ts } => tracing::debug!(
                    last_activity = %timestamp::format_epoch(last_ts),
                    "recorded new activity"
                ),
                Decision::AlreadyNotified { last_ts, idle_secs }
                | Decision::NotIdleYet { last_ts, idle_secs } => tracing::debug!(
                    last_activity = %timestamp::format_epoch(last_ts),
                    idle_mins = (idle_secs / 60.0).floor(),
                    "no notification needed"
                ),
                Decision::NoActiveLog | Decision::Locked => {}
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "idle check failed");
            ExitCode::FAILURE
        }
    }
}

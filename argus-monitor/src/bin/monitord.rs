//! Monitor daemon entry point.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use argus_monitor::alert::build_dispatcher;
use argus_monitor::camera::SpoolDirSource;
use argus_monitor::config::ConfigWatcher;
use argus_monitor::detect::HeuristicExtractor;
use argus_monitor::monitor::Monitor;
use argus_monitor::tracing::prelude::*;

const DEFAULT_CONFIG: &str = "/etc/argus-monitor/config.json";

struct Args {
    config: PathBuf,
    once: bool,
}

fn parse_args() -> Args {
    let mut config = std::env::var("ARGUS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG));
    let mut once = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => config = PathBuf::from(path),
                None => usage_exit("--config requires a path"),
            },
            "--once" => once = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => usage_exit(&format!("unknown argument: {other}")),
        }
    }

    Args { config, once }
}

fn print_usage() {
    eprintln!("Usage: argus-monitord [--config <path>] [--once]");
    eprintln!();
    eprintln!("  --config <path>  Config file (default {DEFAULT_CONFIG}, env ARGUS_CONFIG)");
    eprintln!("  --once           Run a single cycle and exit");
}

fn usage_exit(problem: &str) -> ! {
    eprintln!("error: {problem}");
    eprintln!();
    print_usage();
    std::process::exit(1);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_timer(LocalTime::rfc_3339());
    // Journald is optional; running outside systemd just logs to the
    // terminal.
    let journald = tracing_journald::layer().ok();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(journald)
        .init();
}

async fn shutdown_signal(cancellation: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                error!(%error, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                cancellation.cancel();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl-C"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received Ctrl-C");
    }

    cancellation.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = parse_args();

    let (config, watcher) = ConfigWatcher::load(args.config.clone())
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    let source = SpoolDirSource::new(
        config.spool_dir.clone(),
        Duration::from_secs(config.max_frame_age_seconds),
    );
    let dispatcher = build_dispatcher(&config.alerts);
    let monitor = Monitor::new(
        config,
        Some(watcher),
        Box::new(source),
        Box::new(HeuristicExtractor),
        dispatcher,
    )?;

    let summary = if args.once {
        monitor.run_once().await
    } else {
        let cancellation = CancellationToken::new();
        tokio::spawn(shutdown_signal(cancellation.clone()));
        monitor.run(cancellation).await
    };

    info!(
        cycles_run = summary.cycles_run,
        notifications_sent = summary.notifications_sent,
        active = summary.state_counts.active,
        inactive = summary.state_counts.inactive,
        unknown = summary.state_counts.unknown,
        "Monitor exited"
    );
    Ok(())
}

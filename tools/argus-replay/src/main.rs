//! Replay recorded observations against a candidate config.
//!
//! The monitor's observation log keeps the raw region signals next to
//! each decision, so threshold changes can be vetted offline before
//! they go live: point this tool at one or more log files and a
//! candidate config, and it reports every decision that would flip.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use colored::{ColoredString, Colorize as _};

use argus_monitor::classify::{MachineStatus, classify};
use argus_monitor::config::MonitorConfig;
use argus_monitor::monitor::Observation;

#[derive(Parser)]
#[command(
    name = "argus-replay",
    about = "Replay observation logs against a candidate monitor config"
)]
struct Cli {
    /// Candidate config file to evaluate.
    #[arg(short, long)]
    config: PathBuf,

    /// Observation log files (JSONL), oldest first.
    #[arg(required = true)]
    logs: Vec<PathBuf>,

    /// Print every decision, not only the ones that change.
    #[arg(long)]
    verbose: bool,
}

#[derive(Default)]
struct Tally {
    total: usize,
    changed: usize,
    skipped: usize,
    flips: BTreeMap<(MachineStatus, MachineStatus), usize>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = MonitorConfig::load(&cli.config)
        .with_context(|| format!("loading candidate config from {}", cli.config.display()))?;

    let mut tally = Tally::default();
    for path in &cli.logs {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;

        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let observation: Observation = serde_json::from_str(line)
                .with_context(|| format!("parsing {}:{}", path.display(), idx + 1))?;
            replay_one(&config, &observation, cli.verbose, &mut tally);
        }
    }

    print_summary(&tally, cli.logs.len());
    Ok(())
}

fn replay_one(config: &MonitorConfig, observation: &Observation, verbose: bool, tally: &mut Tally) {
    tally.total += 1;

    let Some(machine) = config
        .machines
        .iter()
        .find(|m| m.id == observation.machine_id)
    else {
        tally.skipped += 1;
        return;
    };

    let result = classify(&observation.raw_signals, machine, &config.detection);
    let before = observation.classified_state;
    let after = result.status;

    if after != before {
        tally.changed += 1;
        *tally.flips.entry((before, after)).or_default() += 1;
        println!(
            "{} {} {} -> {}  was [{}], now [{}]",
            observation.timestamp,
            observation.machine_id.bold(),
            paint(before),
            paint(after),
            observation.decision_path,
            result.decision_path,
        );
    } else if verbose {
        println!(
            "{}",
            format!(
                "{} {} {} unchanged [{}]",
                observation.timestamp, observation.machine_id, before, result.decision_path,
            )
            .dimmed()
        );
    }
}

fn print_summary(tally: &Tally, files: usize) {
    let unchanged = tally.total - tally.changed - tally.skipped;
    println!();
    println!(
        "replayed {} observations from {} file(s)",
        tally.total, files
    );
    println!("  unchanged: {}", unchanged.to_string().green());
    println!(
        "  changed:   {}",
        if tally.changed > 0 {
            tally.changed.to_string().yellow()
        } else {
            tally.changed.to_string().green()
        }
    );
    if tally.skipped > 0 {
        println!(
            "  skipped:   {} (machine not in candidate config)",
            tally.skipped.to_string().red()
        );
    }

    if !tally.flips.is_empty() {
        println!();
        for ((before, after), count) in &tally.flips {
            println!("  {} -> {}: {count}", paint(*before), paint(*after));
        }
    }
}

fn paint(status: MachineStatus) -> ColoredString {
    match status {
        MachineStatus::Active => "active".green(),
        MachineStatus::Inactive => "inactive".red(),
        MachineStatus::Unknown => "unknown".yellow(),
    }
}

use std::{collections::BTreeMap, fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use failure_tracker::{load_settings, SessionFacts};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod replay;

use replay::{default_end_at, parse_lines, Replay};

/// Replays recorded decryption notifications through the failure tracker and
/// prints every report it would send, one JSON object per line.
#[derive(Parser, Debug)]
struct Cli {
    /// JSON-lines file of `{"at": <ms>, "notification": {...}}` entries.
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Simulated time at which the replay stops running timers.
    #[arg(long)]
    end_at: Option<i64>,
    #[arg(long)]
    user_domain: Option<String>,
    #[arg(long)]
    crypto_version: Option<String>,
    #[arg(long)]
    trusts_own_identity: Option<bool>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let settings = load_settings(cli.settings.as_deref())?;
    let raw = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read replay input '{}'", cli.input.display()))?;
    let lines = parse_lines(&raw)?;

    let facts = SessionFacts::compute(cli.user_domain, cli.crypto_version.as_deref(), &settings);
    let end_at = cli.end_at.unwrap_or_else(|| {
        default_end_at(lines.last().map_or(0, |line| line.at), &settings)
    });

    let mut replay = Replay::new(settings, facts, cli.trusts_own_identity);
    for line in &lines {
        replay.apply(line);
    }
    let reports = replay.finish(end_at);

    let mut per_category = BTreeMap::new();
    for report in &reports {
        *per_category.entry(report.category).or_insert(0usize) += 1;
        println!("{}", serde_json::to_string(report)?);
    }
    for (category, count) in &per_category {
        info!(category = %category, count, "utd: replay summary");
    }
    info!(
        entries = lines.len(),
        reports = reports.len(),
        end_at,
        "utd: replay finished"
    );

    Ok(())
}

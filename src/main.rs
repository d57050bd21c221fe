//! crossings: who should meet, and why, right now.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;

use crossings_lib::error::{ErrorReport, MatchError};
use crossings_lib::matching::MatchResult;
use crossings_lib::proactive::scanner::run_scanner;
use crossings_lib::proactive::{SweepMode, TickOutcome};
use crossings_lib::signals::MatchMode;
use crossings_lib::state::{load_config, AppState};
use crossings_lib::trends::TopicCluster;
use crossings_lib::types::{normalize_handle, Profile};

#[derive(Parser)]
#[command(name = "crossings")]
#[command(version, about = "Connection recommendations for small communities")]
struct Cli {
    /// Path to configuration file (default: ~/.crossings/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Suggest people for a member to meet
    Suggest {
        handle: String,
        /// discovery, workshop, both-online or dormant
        #[arg(long, default_value = "discovery", value_parser = parse_mode)]
        mode: MatchMode,
        #[arg(long)]
        limit: Option<usize>,
        /// Record the suggestions so they are not repeated
        #[arg(long)]
        record: bool,
    },
    /// Run one proactive sweep
    Sweep {
        /// realtime, digest or all
        #[arg(long, default_value = "all", value_parser = parse_sweep_mode)]
        mode: SweepMode,
    },
    /// Show topic clusters
    Clusters {
        #[arg(long)]
        window_hours: Option<i64>,
    },
    /// Run the proactive scanner until Ctrl-C
    Watch,
    /// Import profiles from a JSON array
    Import { file: PathBuf },
    /// Record a connection between two members
    Connect {
        a: String,
        b: String,
        #[arg(long, default_value = "introduced")]
        reason: String,
    },
}

fn parse_mode(s: &str) -> Result<MatchMode, String> {
    MatchMode::parse(s).ok_or_else(|| format!("unknown mode '{}'", s))
}

fn parse_sweep_mode(s: &str) -> Result<SweepMode, String> {
    SweepMode::parse(s).ok_or_else(|| format!("unknown sweep mode '{}'", s))
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                print_json(&ErrorReport::from(&e));
            } else {
                eprintln!("Error: {}", e);
                eprintln!("{}", e.recovery_suggestion());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), MatchError> {
    let config = load_config(cli.config.as_deref())?;
    let state = AppState::open(config)?;
    let now = Utc::now();

    match &cli.command {
        Command::Suggest { handle, mode, limit, record } => {
            let results = if *record {
                state.service.suggest_and_record(handle, *mode, *limit, now)?
            } else {
                state.service.suggest(handle, *mode, *limit, now)?
            };
            if cli.json {
                print_json(&results);
            } else {
                print_matches(handle, &results);
            }
        }
        Command::Sweep { mode } => match state.monitor.run_sweep(*mode, now)? {
            TickOutcome::Skipped => println!("Sweep skipped: another sweep is running"),
            TickOutcome::Completed(report) => {
                if cli.json {
                    print_json(&report);
                } else if report.opportunities.is_empty() {
                    println!("No opportunities right now.");
                } else {
                    for opp in &report.opportunities {
                        println!("{}", opp.headline);
                        for reason in &opp.reasons {
                            println!("    - {}", reason);
                        }
                    }
                }
            }
        },
        Command::Clusters { window_hours } => {
            let hours = window_hours.unwrap_or(state.config.monitor.trend_window_hours);
            let clusters = state.service.clusters(hours, now)?;
            if cli.json {
                print_json(&clusters);
            } else {
                print_clusters(&clusters);
            }
        }
        Command::Watch => {
            let period = Duration::from_secs(state.config.monitor.tick_interval_secs);
            let (tx, rx) = watch::channel(false);
            let scanner = tokio::spawn(run_scanner(state.monitor.clone(), period, rx));

            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("Scanner: could not listen for Ctrl-C: {}", e);
            }
            let _ = tx.send(true);
            match scanner.await {
                Ok(ticks) => println!("Stopped after {} tick(s).", ticks),
                Err(e) => log::warn!("Scanner: task ended abnormally: {}", e),
            }
        }
        Command::Import { file } => {
            let content = fs::read_to_string(file)
                .map_err(|e| MatchError::InvalidInput(format!("Failed to read {}: {}", file.display(), e)))?;
            let mut profiles: Vec<Profile> = serde_json::from_str(&content)
                .map_err(|e| MatchError::InvalidInput(format!("Failed to parse {}: {}", file.display(), e)))?;
            for profile in &mut profiles {
                profile.handle = normalize_handle(&profile.handle)?;
            }
            state.repo.with_db(|db| {
                for profile in &profiles {
                    db.upsert_profile(profile)?;
                }
                Ok(())
            })?;
            log::info!("Import: {} profile(s) from {}", profiles.len(), file.display());
            println!("Imported {} profile(s).", profiles.len());
        }
        Command::Connect { a, b, reason } => {
            let (a, b) = (normalize_handle(a)?, normalize_handle(b)?);
            if a == b {
                return Err(MatchError::InvalidInput("cannot connect a member to themself".to_string()));
            }
            for handle in [&a, &b] {
                if state.repo.with_db(|db| db.get_profile(handle))?.is_none() {
                    return Err(MatchError::NotFound(handle.clone()));
                }
            }
            state.repo.with_db(|db| db.add_connection(&a, &b, reason, now))?;
            println!("Connected @{} and @{}.", a, b);
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => log::warn!("Failed to serialize output: {}", e),
    }
}

fn print_matches(handle: &str, results: &[MatchResult]) {
    if results.is_empty() {
        println!("No suggestions for {} right now.", handle);
        return;
    }
    for r in results {
        println!(
            "@{}  {:.0}  (seen {})",
            r.handle, r.score, r.profile_summary.last_seen_label
        );
        if let Some(building) = &r.profile_summary.building {
            println!("    building: {}", building);
        }
        for reason in &r.reasons {
            println!("    - {}", reason);
        }
    }
}

fn print_clusters(clusters: &[TopicCluster]) {
    if clusters.is_empty() {
        println!("No topic clusters in this window.");
        return;
    }
    for c in clusters {
        let members: Vec<String> = c.members.iter().map(|m| format!("@{}", m)).collect();
        println!("#{}  {} member(s)  weight {:.2}", c.topic, c.members.len(), c.weight);
        println!("    {}", members.join(" "));
    }
}

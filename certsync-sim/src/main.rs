//! certsync simulator
//!
//! Runs one client session against an in-memory ledger and prints what the
//! client ended up showing.
//!
//! Usage:
//!   certsync-sim --neurons 5 --fail 3 --ticks 3 --verbose

use anyhow::{Context, Result};
use certsync::ClientConfig;
use certsync_sim::{run_scenario, LatencyProfile, NeuronId, ScenarioConfig};
use clap::Parser;
use std::{fs, path::PathBuf, time::Duration};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "certsync-sim")]
#[command(about = "Simulated certsync client session")]
struct Args {
    /// Number of neurons to vote with
    #[arg(short, long, default_value = "5")]
    neurons: u64,

    /// Neuron ids whose votes are rejected (repeatable)
    #[arg(short, long)]
    fail: Vec<u64>,

    /// Poll ticks to run after voting
    #[arg(short, long, default_value = "3")]
    ticks: u64,

    /// Poll interval, overrides the config file
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Query channel latency
    #[arg(long, default_value = "20")]
    query_ms: u64,

    /// Update channel latency
    #[arg(long, default_value = "150")]
    update_ms: u64,

    /// Path to a JSON client config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for latency jitter
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut client = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ClientConfig::from_json_str(&json)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => ClientConfig {
            poll_interval_ms: 500,
            ..ClientConfig::default()
        },
    };
    if let Some(ms) = args.interval_ms {
        client.poll_interval_ms = ms;
    }
    client.validate()?;
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let client = load_config(&args)?;
    info!(label = %client.log_label, interval_ms = client.poll_interval_ms, "certsync-sim starting");

    let report = run_scenario(ScenarioConfig {
        client,
        neurons: args.neurons,
        ineligible: args.fail.iter().copied().map(NeuronId).collect(),
        ticks: args.ticks,
        latency: LatencyProfile {
            query: Duration::from_millis(args.query_ms),
            update: Duration::from_millis(args.update_ms),
            ..LatencyProfile::default()
        },
        seed: args.seed,
        ..ScenarioConfig::default()
    })
    .await?;

    println!("\n========================================");
    println!("  certsync session");
    println!("========================================");
    println!(
        "  Balance:   {} ({})",
        report.balance.value,
        if report.balance.certified { "certified" } else { "unverified" }
    );
    let rendered: Vec<String> = report
        .balance_history
        .iter()
        .map(|(value, certified)| format!("{value}{}", if *certified { "" } else { "?" }))
        .collect();
    println!("  Rendered:  {}", rendered.join(" -> "));
    println!(
        "  Voted:     {} of {} neurons",
        report.neurons.value.voted(),
        report.neurons.value.0.len()
    );
    match &report.vote.failure {
        Some(failure) => println!("  Failures:  {failure}"),
        None => println!("  Failures:  none"),
    }
    println!(
        "  Polling:   {} results published, {} neuron reads",
        report.polls_published, report.neuron_fetches
    );
    println!("========================================\n");
    Ok(())
}

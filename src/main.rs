mod aggregate;
mod config;
mod error;
mod ingest;
mod parser;
mod pid;
mod reconcile;
mod select;
mod vote;

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser as _;
use tracing_subscriber::EnvFilter;

use config::Cli;
use error::EngineError;

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs_f64()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let now = now();

    let consensus_text = fs::read_to_string(&cli.consensus).map_err(|source| EngineError::ConsensusIo {
        path: cli.consensus.clone(),
        source,
    })?;
    let mut consensus = parser::parse_consensus(&consensus_text)?;

    if !consensus.has_any_bandwidth() {
        tracing::error!("your Tor is not providing NS w bandwidths");
        return Ok(());
    }

    let prior_votes = vote::load_prior_votes(&cli.vote_file);

    let ingested = ingest::scan_directories(&cli.scanner_dirs, now, cli.max_age);
    let mut aggregator = aggregate::Aggregator::new();
    for file in &ingested.files {
        for record in ingest::load_records(file) {
            aggregator.ingest(record);
        }
    }

    if aggregator.is_empty() {
        tracing::error!("no scan results yet");
        return Err(EngineError::NoMeasurements.into());
    }

    let mut relays = aggregator.into_relays();
    tracing::info!(relay_count = relays.len(), "collected measurements");

    let averages = select::select(&mut relays);
    pid::compute_ratio_and_error(&mut relays, &averages);

    let node_sample_rate = pid::node_sample_rate(&relays, &consensus, &prior_votes, cli.guard_period);
    tracing::info!(node_sample_rate, "average node measurement interval");

    let params = cli.pid_params();
    for (idhex, relay) in relays.iter_mut() {
        let consensus_entry = consensus.relays.get(idhex);
        let prior = prior_votes.get(idhex);
        pid::apply_control(
            relay,
            consensus_entry,
            prior,
            &consensus.meta,
            &params,
            node_sample_rate,
            now,
        );
    }

    let outcome = reconcile::reconcile(&mut relays, &mut consensus, cli.ignore_guards, cli.node_cap);

    if outcome.measured_pct < cli.min_report {
        tracing::error!(
            measured_pct = outcome.measured_pct,
            min_report = cli.min_report,
            "did not measure enough of the network yet"
        );
        return Err(EngineError::CoverageGate {
            measured_pct: outcome.measured_pct,
            min_report: cli.min_report,
        }
        .into());
    }
    tracing::info!(measured_pct = outcome.measured_pct, "measured percentage of all tor nodes");

    ingested.warn_stale_scanners(now, cli.max_scan_age);

    let sorted = reconcile::sorted_by_change(&relays);
    vote::write_vote_file(&cli.vote_file, ingested.header_timestamp(), &sorted)?;

    println!(
        "Wrote vote for {} relays ({:.1}% of the network measured).",
        sorted.iter().filter(|r| !r.ignore).count(),
        outcome.measured_pct
    );

    Ok(())
}

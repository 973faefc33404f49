//! Model estimation command
//!
//! Reads a raw events file, fits the simulation parameters (row-stochastic
//! matrix, exponential rates, framing lengths), and writes the simulation
//! file the replayer consumes.

#![forbid(unsafe_code)]

use std::{env, path::PathBuf, process};

use statewalk::estimator;
use statewalk::model::EventsFile;

const KNOWN_FLAGS: &[&str] = &["--input", "--output"];

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn check_usage(args: &[String]) -> anyhow::Result<()> {
    for a in &args[1..] {
        if a.starts_with("--") && !KNOWN_FLAGS.contains(&a.as_str()) {
            return Err(anyhow::anyhow!(
                "unrecognised flag `{a}`\nusage: estimate --input <events.json> [--output <simulation.json>]"
            ));
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    check_usage(&args)?;

    let input = PathBuf::from(
        parse_flag(&args, "--input")
            .ok_or_else(|| anyhow::anyhow!("missing required flag --input"))?,
    );
    let output = PathBuf::from(
        parse_flag(&args, "--output").unwrap_or_else(|| "simulation.json".to_string()),
    );

    let events =
        EventsFile::read(&input).map_err(|e| anyhow::anyhow!("read {}: {e}", input.display()))?;
    let simulation =
        estimator::estimate(&events).map_err(|e| anyhow::anyhow!("estimate: {e}"))?;
    simulation
        .write(&output)
        .map_err(|e| anyhow::anyhow!("write {}: {e}", output.display()))?;

    eprintln!(
        "✓ Estimated simulation model: {} operations, λ(contracts)={:.4}, λ(snapshots)={:.4}",
        simulation.operations.len(),
        simulation.contract_stats.lambda,
        simulation.snapshot_lambda
    );
    eprintln!(
        "  framing: block-length={}, sync-period-length={}, transaction-length={}",
        simulation.block_length, simulation.sync_period_length, simulation.transaction_length
    );
    eprintln!("  → {}", output.display());
    Ok(())
}

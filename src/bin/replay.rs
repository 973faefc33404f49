//! Replay command
//!
//! Reads a simulation model and drives the in-memory reference backend
//! through the stochastic walk. Progress and failures are reported through
//! `tracing`; set `RUST_LOG=statewalk=debug` for per-block detail.

#![forbid(unsafe_code)]

use std::{env, path::PathBuf, process};

use statewalk::model::SimulationFile;
use statewalk::replayer::{ReplayConfig, Replayer};
use statewalk::InMemoryStateDb;

const KNOWN_FLAGS: &[&str] = &[
    "--model",
    "--blocks",
    "--seed",
    "--balance-range",
    "--nonce-range",
    "--max-code-size",
    "--continue-on-failure",
];

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn parse_u64(args: &[String], key: &str, default: u64) -> anyhow::Result<u64> {
    match parse_flag(args, key) {
        Some(s) => s
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be an integer (got `{s}`)")),
        None => Ok(default),
    }
}

fn check_usage(args: &[String]) -> anyhow::Result<()> {
    for a in &args[1..] {
        if a.starts_with("--") && !KNOWN_FLAGS.contains(&a.as_str()) {
            return Err(anyhow::anyhow!(
                "unrecognised flag `{a}`\nusage: replay --model <simulation.json> [--blocks <n>] [--seed <n>] [--balance-range <n>] [--nonce-range <n>] [--max-code-size <n>] [--continue-on-failure]"
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
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "statewalk=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = env::args().collect();
    check_usage(&args)?;

    let model_path = PathBuf::from(
        parse_flag(&args, "--model")
            .ok_or_else(|| anyhow::anyhow!("missing required flag --model"))?,
    );
    let model = SimulationFile::read(&model_path)
        .map_err(|e| anyhow::anyhow!("read {}: {e}", model_path.display()))?;

    let cfg = ReplayConfig {
        blocks: parse_u64(&args, "--blocks", 10)?,
        seed: parse_u64(&args, "--seed", 0)?,
        balance_range: parse_u64(&args, "--balance-range", 1_000_000)?,
        nonce_range: parse_u64(&args, "--nonce-range", 1_000)?,
        max_code_size: parse_u64(&args, "--max-code-size", 24_576)? as usize,
        continue_on_failure: has_flag(&args, "--continue-on-failure"),
        ..ReplayConfig::default()
    };

    let replayer = Replayer::new(&model, InMemoryStateDb::new(), cfg)
        .map_err(|e| anyhow::anyhow!("replayer: {e}"))?;
    let (db, stats) = replayer.run().map_err(|e| anyhow::anyhow!("replay: {e}"))?;

    eprintln!(
        "✓ Replayed {} sync periods / {} blocks / {} transactions / {} data operations",
        stats.sync_periods, stats.blocks, stats.transactions, stats.data_ops
    );
    eprintln!(
        "  snapshots={}, reverts={}, failures={}, final accounts={}",
        stats.snapshots,
        stats.reverts,
        stats.failures,
        db.account_count()
    );
    eprintln!("  state digest: {}", hex::encode(db.state_digest()));
    Ok(())
}

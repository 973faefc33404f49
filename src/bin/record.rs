//! Recording command
//!
//! Replays a simulation model through a `RecorderProxy` over the in-memory
//! reference backend and writes the re-recorded events file. This closes the
//! model pipeline on itself: replaying the estimated model of a recording
//! should re-record to statistics close to the original. Optionally also
//! writes the standalone access-statistics file.

#![forbid(unsafe_code)]

use std::{env, path::PathBuf, process};

use statewalk::model::{EventsFile, SimulationFile, StatsFile};
use statewalk::proxy::RecorderProxy;
use statewalk::replayer::{ReplayConfig, Replayer};
use statewalk::{InMemoryStateDb, Recorder};

const KNOWN_FLAGS: &[&str] = &[
    "--model",
    "--blocks",
    "--seed",
    "--output",
    "--stats-output",
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
                "unrecognised flag `{a}`\nusage: record --model <simulation.json> [--blocks <n>] [--seed <n>] [--output <events.json>] [--stats-output <stats.json>]"
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

    let model_path = PathBuf::from(
        parse_flag(&args, "--model")
            .ok_or_else(|| anyhow::anyhow!("missing required flag --model"))?,
    );
    let output = PathBuf::from(
        parse_flag(&args, "--output").unwrap_or_else(|| "recorded-events.json".to_string()),
    );
    let stats_output = parse_flag(&args, "--stats-output").map(PathBuf::from);

    let model = SimulationFile::read(&model_path)
        .map_err(|e| anyhow::anyhow!("read {}: {e}", model_path.display()))?;

    let cfg = ReplayConfig {
        blocks: parse_u64(&args, "--blocks", 10)?,
        seed: parse_u64(&args, "--seed", 0)?,
        ..ReplayConfig::default()
    };

    let proxy = RecorderProxy::new(InMemoryStateDb::new(), Recorder::new());
    let replayer =
        Replayer::new(&model, proxy, cfg).map_err(|e| anyhow::anyhow!("replayer: {e}"))?;
    let (proxy, stats) = replayer.run().map_err(|e| anyhow::anyhow!("replay: {e}"))?;
    let (_, recorder) = proxy.into_parts();

    let events = EventsFile::from_recorder(&recorder);
    events
        .write(&output)
        .map_err(|e| anyhow::anyhow!("write {}: {e}", output.display()))?;
    eprintln!(
        "✓ Recorded {} blocks / {} transactions / {} data operations",
        stats.blocks, stats.transactions, stats.data_ops
    );
    eprintln!("  → {}", output.display());

    if let Some(path) = stats_output {
        StatsFile::from_recorder(&recorder)
            .write(&path)
            .map_err(|e| anyhow::anyhow!("write {}: {e}", path.display()))?;
        eprintln!("  → {} (access statistics)", path.display());
    }
    Ok(())
}

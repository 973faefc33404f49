//! Uniform model generator
//!
//! Builds a synthetic recorder snapshot with uniform parameters and writes
//! it as an events file. The result feeds `estimate` and then `replay`,
//! which makes this the zero-dependency smoke path of the whole pipeline.

#![forbid(unsafe_code)]

use std::{env, path::PathBuf, process};

use statewalk::model::EventsFile;
use statewalk::uniform::UniformModelBuilder;

const KNOWN_FLAGS: &[&str] = &[
    "--block-length",
    "--sync-period-length",
    "--transaction-length",
    "--contracts",
    "--keys",
    "--values",
    "--snapshot-depth",
    "--output",
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
                "unrecognised flag `{a}`\nusage: generate [{}] <value> ...",
                KNOWN_FLAGS.join(" <value>] [")
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

    let builder = UniformModelBuilder {
        block_length: parse_u64(&args, "--block-length", 3)?,
        sync_period_length: parse_u64(&args, "--sync-period-length", 2)?,
        transaction_length: parse_u64(&args, "--transaction-length", 4)?,
        contracts: parse_u64(&args, "--contracts", 100)?,
        keys: parse_u64(&args, "--keys", 100)?,
        values: parse_u64(&args, "--values", 100)?,
        snapshot_depth: parse_u64(&args, "--snapshot-depth", 10)?,
    };
    let output = PathBuf::from(
        parse_flag(&args, "--output").unwrap_or_else(|| "events.json".to_string()),
    );

    let recorder = builder
        .build()
        .map_err(|e| anyhow::anyhow!("uniform model: {e}"))?;
    let events = EventsFile::from_recorder(&recorder);
    events
        .write(&output)
        .map_err(|e| anyhow::anyhow!("write {}: {e}", output.display()))?;

    eprintln!(
        "✓ Wrote uniform events model: {} operations, block-length={}, sync-period-length={}",
        events.operations.len(),
        builder.block_length,
        builder.sync_period_length
    );
    eprintln!("  → {}", output.display());
    eprintln!();
    eprintln!("Next: cargo run --bin estimate -- --input {} --output simulation.json", output.display());
    Ok(())
}

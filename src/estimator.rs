//! Model estimation: raw events → fitted simulation parameters
//!
//! The recorder snapshot stores integer frequencies; the replayer wants
//! probabilities and closed-form distribution parameters. Estimation
//! performs three fits:
//!
//! - each transition row is normalised into a probability row;
//! - the truncated-exponential rate λ is fitted to each classifier ECDF and
//!   to the snapshot-delta ECDF by least squares over the CDF, searched with
//!   golden sections in log-λ space;
//! - the structural framing lengths are derived from the framing rows of
//!   the transition table (with operation-frequency ratios as fallback).

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use tracing::debug;

use crate::ecdf::{EcdfPoint, KahanSum};
use crate::model::{
    ArgumentModel, EventsFile, ModelError, SimulationFile, FILE_ID_SIMULATION,
};
use crate::opcode::{Op, XOp};

/// Search window for the exponential rate.
const LAMBDA_MIN: f64 = 1e-6;
const LAMBDA_MAX: f64 = 1e3;
/// Golden-section iterations; enough for ~12 significant digits on the
/// log-λ interval.
const FIT_ITERATIONS: usize = 100;

/// Errors raised during estimation.
#[derive(Debug, thiserror::Error)]
pub enum EstimatorError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("events file has an empty operation alphabet")]
    EmptyAlphabet,
}

/// CDF of the exponential distribution truncated and renormalised to `[0,1]`.
fn truncated_exp_cdf(lambda: f64, x: f64) -> f64 {
    (1.0 - (-lambda * x).exp()) / (1.0 - (-lambda).exp())
}

/// Squared CDF distance between the fit candidate and the empirical points.
fn fit_objective(lambda: f64, points: &[EcdfPoint]) -> f64 {
    points
        .iter()
        .map(|&(x, y)| {
            let d = truncated_exp_cdf(lambda, x) - y;
            d * d
        })
        .sum()
}

/// Fit the truncated-exponential rate to an ECDF by golden-section search
/// over log-λ.
pub fn fit_exponential(points: &[EcdfPoint]) -> f64 {
    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let (mut lo, mut hi) = (LAMBDA_MIN.ln(), LAMBDA_MAX.ln());
    let mut a = hi - inv_phi * (hi - lo);
    let mut b = lo + inv_phi * (hi - lo);
    let mut fa = fit_objective(a.exp(), points);
    let mut fb = fit_objective(b.exp(), points);
    for _ in 0..FIT_ITERATIONS {
        if fa < fb {
            hi = b;
            b = a;
            fb = fa;
            a = hi - inv_phi * (hi - lo);
            fa = fit_objective(a.exp(), points);
        } else {
            lo = a;
            a = b;
            fa = fb;
            b = lo + inv_phi * (hi - lo);
            fb = fit_objective(b.exp(), points);
        }
    }
    ((lo + hi) / 2.0).exp()
}

/// `round(num / den)` clamped to at least 1, or `default` when `den` is 0.
fn ratio_or(num: u64, den: u64, default: u64) -> u64 {
    if den == 0 {
        return default;
    }
    ((num as f64 / den as f64).round() as u64).max(1)
}

struct FramingLengths {
    block: u64,
    sync_period: u64,
    transaction: u64,
}

/// Derive the structural lengths from the framing rows of the transition
/// table. The uniform builder wires these rows exactly; recorded workloads
/// yield the observed averages.
fn derive_framing(events: &EventsFile) -> FramingLengths {
    let index_of = |op: Op| {
        let mnemonic = XOp::nullary(op).mnemonic();
        events.operations.iter().position(|m| *m == mnemonic)
    };
    let freq_of = |op: Op| {
        index_of(op)
            .map(|i| events.operation_frequencies[i])
            .unwrap_or(0)
    };
    let row_entry = |from: Option<usize>, to: Option<usize>| match (from, to) {
        (Some(f), Some(t)) => events.transition_frequencies[f][t],
        _ => 0,
    };

    let (bt, et) = (index_of(Op::BeginTransaction), index_of(Op::EndTransaction));
    let (bb, eb) = (index_of(Op::BeginBlock), index_of(Op::EndBlock));
    let es = index_of(Op::EndSyncPeriod);

    // Transactions per block: how many transactions open for every block
    // close, read off the EndTransaction row.
    let et_to_bt = row_entry(et, bt);
    let et_to_eb = row_entry(et, eb);
    let block = if et_to_eb > 0 {
        ratio_or(et_to_bt + et_to_eb, et_to_eb, 1)
    } else {
        ratio_or(freq_of(Op::BeginTransaction), freq_of(Op::BeginBlock), 1)
    };

    let eb_to_bb = row_entry(eb, bb);
    let eb_to_es = row_entry(eb, es);
    let sync_period = if eb_to_es > 0 {
        ratio_or(eb_to_bb + eb_to_es, eb_to_es, 1)
    } else {
        ratio_or(freq_of(Op::BeginBlock), freq_of(Op::BeginSyncPeriod), 1)
    };

    // Data operations per transaction: mass leaving data rows versus the
    // share of it that closes the transaction.
    let mut data_total = 0u64;
    let mut data_to_et = 0u64;
    for (i, mnemonic) in events.operations.iter().enumerate() {
        let xop = XOp::parse_mnemonic(mnemonic).expect("validated mnemonic");
        if xop.op.is_framing() {
            continue;
        }
        data_total += events.transition_frequencies[i].iter().sum::<u64>();
        if let Some(e) = et {
            data_to_et += events.transition_frequencies[i][e];
        }
    }
    let transaction = ratio_or(data_total, data_to_et, 1);

    FramingLengths {
        block,
        sync_period,
        transaction,
    }
}

/// Fit an events file into the simulation model the replayer consumes.
pub fn estimate(events: &EventsFile) -> Result<SimulationFile, EstimatorError> {
    events.validate()?;
    if events.operations.is_empty() {
        return Err(EstimatorError::EmptyAlphabet);
    }

    let stochastic_matrix: Vec<Vec<f64>> = events
        .transition_frequencies
        .iter()
        .map(|row| {
            let mut total = KahanSum::new();
            for &c in row {
                total.add(c as f64);
            }
            if total.value() <= 0.0 {
                vec![0.0; row.len()]
            } else {
                row.iter().map(|&c| c as f64 / total.value()).collect()
            }
        })
        .collect();

    let argument_model = |stats: &crate::classifier::ClassifierStats| ArgumentModel {
        n: stats.counting.n,
        lambda: fit_exponential(&stats.counting.ecdf),
        queue_distribution: stats.queue.distribution.clone(),
    };

    let framing = derive_framing(events);
    let simulation = SimulationFile {
        file_id: FILE_ID_SIMULATION.to_string(),
        operations: events.operations.clone(),
        stochastic_matrix,
        contract_stats: argument_model(&events.contract_stats),
        key_stats: argument_model(&events.key_stats),
        value_stats: argument_model(&events.value_stats),
        snapshot_lambda: fit_exponential(&events.snapshot_ecdf),
        block_length: framing.block,
        sync_period_length: framing.sync_period,
        transaction_length: framing.transaction,
        balance_stats: events.balance_stats.clone(),
        nonce_stats: events.nonce_stats.clone(),
        code_size_stats: events.code_size_stats.clone(),
    };
    debug!(
        operations = simulation.operations.len(),
        block_length = simulation.block_length,
        sync_period_length = simulation.sync_period_length,
        transaction_length = simulation.transaction_length,
        "estimated simulation model"
    );
    simulation.validate()?;
    Ok(simulation)
}

//! Canonical model files
//!
//! Three JSON file types, discriminated by a `file-id` field. Decoding is
//! strict: a mismatched or unknown discriminant is rejected before any field
//! is interpreted, and every file is validated structurally after parsing.
//!
//! - **`stats`**: standalone access statistics (the three classifier
//!   exports), useful on their own for workload inspection.
//! - **`events`**: the raw recorder snapshot: observed operation alphabet,
//!   integer frequency tables, classifier stats, snapshot-delta ECDF, and
//!   optional scalar distributions.
//! - **`simulation`**: the fitted model the replayer consumes: the
//!   row-stochastic transition matrix plus per-argument `(n, λ, queue)`
//!   parameters, the snapshot λ, and the structural framing lengths.
//!
//! Serialisation is `serde_json` with kebab-case field names; re-serialising
//! a parsed file reproduces the original bytes modulo key ordering.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierStats;
use crate::ecdf::{self, EcdfPoint};
use crate::opcode::{CodecError, XOp};
use crate::recorder::Recorder;
use crate::scalar::ScalarStats;

pub const FILE_ID_STATS: &str = "stats";
pub const FILE_ID_EVENTS: &str = "events";
pub const FILE_ID_SIMULATION: &str = "simulation";

/// Tolerance for row-stochasticity checks.
pub const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// Errors raised by model encoding, decoding, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("model file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wrong file-id: expected `{expected}`, found `{found}`")]
    WrongFileId { expected: &'static str, found: String },
    #[error("operation mnemonic rejected: {0}")]
    Mnemonic(#[from] CodecError),
    #[error("matrix is not square: row {row} has {len} entries, expected {expected}")]
    NotSquare { row: usize, len: usize, expected: usize },
    #[error("matrix row {row} sums to {sum}, not 1")]
    NotStochastic { row: usize, sum: f64 },
    #[error("non-finite or negative entry at matrix[{row}][{col}]")]
    BadEntry { row: usize, col: usize },
    #[error("invalid parameter: {0}")]
    BadParameter(String),
}

fn check_file_id(expected: &'static str, found: &str) -> Result<(), ModelError> {
    if found != expected {
        return Err(ModelError::WrongFileId {
            expected,
            found: found.to_string(),
        });
    }
    Ok(())
}

fn check_operations(operations: &[String]) -> Result<(), ModelError> {
    for m in operations {
        XOp::parse_mnemonic(m)?;
    }
    Ok(())
}

fn check_square<T>(matrix: &[Vec<T>], order: usize) -> Result<(), ModelError> {
    if matrix.len() != order {
        return Err(ModelError::NotSquare {
            row: 0,
            len: matrix.len(),
            expected: order,
        });
    }
    for (row, r) in matrix.iter().enumerate() {
        if r.len() != order {
            return Err(ModelError::NotSquare {
                row,
                len: r.len(),
                expected: order,
            });
        }
    }
    Ok(())
}

fn check_distribution(name: &str, dist: &[f64]) -> Result<(), ModelError> {
    for &p in dist {
        if !p.is_finite() || p < 0.0 {
            return Err(ModelError::BadParameter(format!(
                "{name} contains a non-finite or negative probability"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// stats
// ---------------------------------------------------------------------------

/// Standalone access-statistics export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatsFile {
    pub file_id: String,
    pub contract_stats: ClassifierStats,
    pub key_stats: ClassifierStats,
    pub value_stats: ClassifierStats,
}

impl StatsFile {
    pub fn from_recorder(recorder: &Recorder) -> Self {
        Self {
            file_id: FILE_ID_STATS.to_string(),
            contract_stats: recorder.contract_stats(),
            key_stats: recorder.key_stats(),
            value_stats: recorder.value_stats(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        check_file_id(FILE_ID_STATS, &self.file_id)?;
        for stats in [&self.contract_stats, &self.key_stats, &self.value_stats] {
            check_distribution("queue distribution", &stats.queue.distribution)?;
        }
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ModelError> {
        let parsed: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn write(&self, path: &Path) -> Result<(), ModelError> {
        self.validate()?;
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// events
// ---------------------------------------------------------------------------

/// Raw recorder snapshot: integer frequencies over the observed alphabet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventsFile {
    pub file_id: String,
    /// Observed XOp mnemonics, sorted by integer encoding.
    pub operations: Vec<String>,
    /// Occurrence count per operation, aligned with `operations`.
    pub operation_frequencies: Vec<u64>,
    /// Successor counts: `transition_frequencies[i][j]` counts `j` observed
    /// immediately after `i`.
    pub transition_frequencies: Vec<Vec<u64>>,
    pub contract_stats: ClassifierStats,
    pub key_stats: ClassifierStats,
    pub value_stats: ClassifierStats,
    /// Compressed CDF of snapshot-revert depths.
    pub snapshot_ecdf: Vec<EcdfPoint>,
    /// Largest observed snapshot depth (x-axis scale of `snapshot_ecdf`).
    pub snapshot_max: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_stats: Option<ScalarStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_stats: Option<ScalarStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_size_stats: Option<ScalarStats>,
}

impl EventsFile {
    /// Snapshot a recorder into the canonical events form.
    pub fn from_recorder(recorder: &Recorder) -> Self {
        let codes = recorder.observed_ops();
        let index_of = |code: usize| codes.binary_search(&code).expect("observed code");

        let operations: Vec<String> = codes
            .iter()
            .map(|&c| XOp::decode(c).expect("observed codes decode").mnemonic())
            .collect();
        let operation_frequencies: Vec<u64> = codes
            .iter()
            .map(|c| *recorder.op_frequencies().get(c).unwrap_or(&0))
            .collect();

        let n = codes.len();
        let mut transition_frequencies = vec![vec![0u64; n]; n];
        for (&(from, to), &count) in recorder.transitions() {
            transition_frequencies[index_of(from)][index_of(to)] = count;
        }

        let snapshot_pairs = recorder.snapshot_pairs();
        let snapshot_max = snapshot_pairs.iter().map(|&(d, _)| d).max().unwrap_or(0);

        Self {
            file_id: FILE_ID_EVENTS.to_string(),
            operations,
            operation_frequencies,
            transition_frequencies,
            contract_stats: recorder.contract_stats(),
            key_stats: recorder.key_stats(),
            value_stats: recorder.value_stats(),
            snapshot_ecdf: ecdf::compressed_value_ecdf(
                &snapshot_pairs,
                snapshot_max,
                crate::NUM_ECDF_POINTS,
            ),
            snapshot_max,
            balance_stats: recorder.balance_stats(),
            nonce_stats: recorder.nonce_stats(),
            code_size_stats: recorder.code_size_stats(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        check_file_id(FILE_ID_EVENTS, &self.file_id)?;
        check_operations(&self.operations)?;
        check_square(&self.transition_frequencies, self.operations.len())?;
        if self.operation_frequencies.len() != self.operations.len() {
            return Err(ModelError::BadParameter(
                "operation-frequencies length differs from operations".into(),
            ));
        }
        for &(x, y) in &self.snapshot_ecdf {
            if !x.is_finite() || !y.is_finite() {
                return Err(ModelError::BadParameter("snapshot-ecdf contains NaN".into()));
            }
        }
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ModelError> {
        let parsed: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn write(&self, path: &Path) -> Result<(), ModelError> {
        self.validate()?;
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// simulation
// ---------------------------------------------------------------------------

/// Fitted parameters of one argument class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArgumentModel {
    /// Cardinality of the universe of previously-seen values.
    pub n: u64,
    /// Exponential decay of the long-tail ("random") argument distribution.
    pub lambda: f64,
    /// Probability of drawing each recency-queue position.
    pub queue_distribution: Vec<f64>,
}

/// Fitted model consumed by the replayer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimulationFile {
    pub file_id: String,
    pub operations: Vec<String>,
    /// Row-stochastic transition matrix over `operations`.
    pub stochastic_matrix: Vec<Vec<f64>>,
    pub contract_stats: ArgumentModel,
    pub key_stats: ArgumentModel,
    pub value_stats: ArgumentModel,
    /// Exponential decay of snapshot-revert depths.
    pub snapshot_lambda: f64,
    /// Transactions per block.
    pub block_length: u64,
    /// Blocks per sync period.
    pub sync_period_length: u64,
    /// Minimum data operations per transaction.
    pub transaction_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_stats: Option<ScalarStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_stats: Option<ScalarStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_size_stats: Option<ScalarStats>,
}

impl SimulationFile {
    pub fn validate(&self) -> Result<(), ModelError> {
        check_file_id(FILE_ID_SIMULATION, &self.file_id)?;
        check_operations(&self.operations)?;
        check_square(&self.stochastic_matrix, self.operations.len())?;

        for (row, r) in self.stochastic_matrix.iter().enumerate() {
            let mut acc = ecdf::KahanSum::new();
            for (col, &p) in r.iter().enumerate() {
                if !p.is_finite() || p < 0.0 {
                    return Err(ModelError::BadEntry { row, col });
                }
                acc.add(p);
            }
            let sum = acc.value();
            // All-zero rows are legal (an alphabet entry that was only ever
            // observed last); anything else must be stochastic.
            if sum != 0.0 && (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(ModelError::NotStochastic { row, sum });
            }
        }

        for (name, arg) in [
            ("contract-stats", &self.contract_stats),
            ("key-stats", &self.key_stats),
            ("value-stats", &self.value_stats),
        ] {
            if !arg.lambda.is_finite() || arg.lambda <= 0.0 {
                return Err(ModelError::BadParameter(format!(
                    "{name}: lambda must be positive and finite"
                )));
            }
            check_distribution(name, &arg.queue_distribution)?;
        }
        if !self.snapshot_lambda.is_finite() || self.snapshot_lambda <= 0.0 {
            return Err(ModelError::BadParameter(
                "snapshot-lambda must be positive and finite".into(),
            ));
        }
        for (name, len) in [
            ("block-length", self.block_length),
            ("sync-period-length", self.sync_period_length),
            ("transaction-length", self.transaction_length),
        ] {
            if len == 0 {
                return Err(ModelError::BadParameter(format!("{name} must be >= 1")));
            }
        }
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ModelError> {
        let parsed: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn write(&self, path: &Path) -> Result<(), ModelError> {
        self.validate()?;
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Peek at the `file-id` of a model file without committing to a schema.
pub fn peek_file_id(path: &Path) -> Result<String, ModelError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "kebab-case")]
    struct Discriminant {
        file_id: String,
    }
    let d: Discriminant = serde_json::from_str(&fs::read_to_string(path)?)?;
    Ok(d.file_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Op;

    fn small_recorder() -> Recorder {
        let mut r = Recorder::new();
        let a = [7u8; 20];
        r.count_addr_op(Op::CreateAccount, a).unwrap();
        r.count_addr_op(Op::GetBalance, a).unwrap();
        r.count_op(Op::Snapshot).unwrap();
        r.count_snapshot(0).unwrap();
        r
    }

    #[test]
    fn events_export_is_square_and_sorted() {
        let events = EventsFile::from_recorder(&small_recorder());
        events.validate().unwrap();
        assert_eq!(events.operations.len(), events.operation_frequencies.len());
        assert_eq!(events.transition_frequencies.len(), events.operations.len());
        // Sorted by encoding means sorted mnemonic codes decode in order.
        let codes: Vec<usize> = events
            .operations
            .iter()
            .map(|m| XOp::parse_mnemonic(m).unwrap().encode())
            .collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        assert_eq!(codes, sorted);
    }

    #[test]
    fn events_json_roundtrip_is_stable() {
        let events = EventsFile::from_recorder(&small_recorder());
        let json = serde_json::to_string_pretty(&events).unwrap();
        let back: EventsFile = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(json, serde_json::to_string_pretty(&back).unwrap());
    }

    #[test]
    fn copied_recorders_export_identical_json() {
        let r1 = small_recorder();
        let r2 = r1.clone();
        let j1 = serde_json::to_string(&EventsFile::from_recorder(&r1)).unwrap();
        let j2 = serde_json::to_string(&EventsFile::from_recorder(&r2)).unwrap();
        assert_eq!(j1, j2);
    }

    #[test]
    fn wrong_file_id_is_rejected() {
        let mut events = EventsFile::from_recorder(&small_recorder());
        events.file_id = "simulation".into();
        assert!(matches!(
            events.validate(),
            Err(ModelError::WrongFileId { .. })
        ));
    }

    #[test]
    fn ragged_matrix_is_rejected() {
        let mut events = EventsFile::from_recorder(&small_recorder());
        events.transition_frequencies[0].push(1);
        assert!(matches!(events.validate(), Err(ModelError::NotSquare { .. })));
    }

    #[test]
    fn bad_mnemonics_are_rejected() {
        let mut events = EventsFile::from_recorder(&small_recorder());
        events.operations[0] = "XXn".into();
        assert!(matches!(events.validate(), Err(ModelError::Mnemonic(_))));
    }

    fn tiny_simulation() -> SimulationFile {
        SimulationFile {
            file_id: FILE_ID_SIMULATION.into(),
            operations: vec!["SP".into(), "RS".into()],
            stochastic_matrix: vec![vec![0.5, 0.5], vec![1.0, 0.0]],
            contract_stats: ArgumentModel {
                n: 10,
                lambda: 3.0,
                queue_distribution: vec![0.5, 0.5],
            },
            key_stats: ArgumentModel {
                n: 10,
                lambda: 3.0,
                queue_distribution: vec![1.0],
            },
            value_stats: ArgumentModel {
                n: 10,
                lambda: 3.0,
                queue_distribution: vec![1.0],
            },
            snapshot_lambda: 2.0,
            block_length: 2,
            sync_period_length: 2,
            transaction_length: 2,
            balance_stats: None,
            nonce_stats: None,
            code_size_stats: None,
        }
    }

    #[test]
    fn simulation_validation_accepts_stochastic_rows() {
        tiny_simulation().validate().unwrap();
    }

    #[test]
    fn simulation_validation_rejects_bad_rows() {
        let mut sim = tiny_simulation();
        sim.stochastic_matrix[0] = vec![0.5, 0.6];
        assert!(matches!(
            sim.validate(),
            Err(ModelError::NotStochastic { row: 0, .. })
        ));

        let mut sim = tiny_simulation();
        sim.stochastic_matrix[1][0] = f64::NAN;
        assert!(matches!(
            sim.validate(),
            Err(ModelError::BadEntry { row: 1, col: 0 })
        ));

        let mut sim = tiny_simulation();
        sim.snapshot_lambda = 0.0;
        assert!(sim.validate().is_err());

        let mut sim = tiny_simulation();
        sim.block_length = 0;
        assert!(sim.validate().is_err());
    }

    #[test]
    fn file_io_roundtrip() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statewalk-model-test-{}.json", std::process::id()));
        let events = EventsFile::from_recorder(&small_recorder());
        events.write(&path).unwrap();
        assert_eq!(peek_file_id(&path).unwrap(), FILE_ID_EVENTS);
        let back = EventsFile::read(&path).unwrap();
        assert_eq!(back.operations, events.operations);
        // Reading it as a simulation file must fail on the discriminant.
        assert!(SimulationFile::read(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}

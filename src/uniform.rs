//! Uniform synthetic model construction
//!
//! Builds a recorder snapshot in which every legal extended operation is
//! equally likely and the framing rows are wired to produce the exact
//! block/transaction structure implied by the builder's lengths. The result
//! feeds the same `events → estimate → replay` pipeline as a real recording,
//! which makes it the standard smoke-test model.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::opcode::{Op, XOp};
use crate::recorder::Recorder;

/// Errors raised by uniform-model construction.
#[derive(Debug, thiserror::Error)]
pub enum UniformError {
    #[error("{0} must be >= 1")]
    BadParameter(&'static str),
}

/// Parameters of the uniform model.
#[derive(Debug, Clone)]
pub struct UniformModelBuilder {
    /// Transactions per block.
    pub block_length: u64,
    /// Blocks per sync period.
    pub sync_period_length: u64,
    /// Expected data operations per transaction.
    pub transaction_length: u64,
    /// Cardinality of the contract-address universe.
    pub contracts: u64,
    /// Cardinality of the storage-key universe.
    pub keys: u64,
    /// Cardinality of the storage-value universe.
    pub values: u64,
    /// Snapshot-revert depths are uniform over `0..snapshot_depth`.
    pub snapshot_depth: u64,
}

impl Default for UniformModelBuilder {
    fn default() -> Self {
        Self {
            block_length: 3,
            sync_period_length: 2,
            transaction_length: 4,
            contracts: 100,
            keys: 100,
            values: 100,
            snapshot_depth: 10,
        }
    }
}

impl UniformModelBuilder {
    fn validate(&self) -> Result<(), UniformError> {
        for (name, v) in [
            ("block-length", self.block_length),
            ("sync-period-length", self.sync_period_length),
            ("transaction-length", self.transaction_length),
            ("contracts", self.contracts),
            ("keys", self.keys),
            ("values", self.values),
            ("snapshot-depth", self.snapshot_depth),
        ] {
            if v == 0 {
                return Err(UniformError::BadParameter(name));
            }
        }
        Ok(())
    }

    /// Build the uniform recorder snapshot.
    pub fn build(&self) -> Result<Recorder, UniformError> {
        self.validate()?;
        let mut recorder = Recorder::new();

        let all = XOp::all_legal();
        let data: Vec<XOp> = all.iter().copied().filter(|x| !x.op.is_framing()).collect();
        let d = data.len() as u64;

        for &xop in &all {
            recorder.seed_op(xop, 1);
        }

        let bs = XOp::nullary(Op::BeginSyncPeriod);
        let es = XOp::nullary(Op::EndSyncPeriod);
        let bb = XOp::nullary(Op::BeginBlock);
        let eb = XOp::nullary(Op::EndBlock);
        let bt = XOp::nullary(Op::BeginTransaction);
        let et = XOp::nullary(Op::EndTransaction);

        // Framing rows: the only row-specific structure in the table.
        recorder.seed_transition(bs, bb, 1);
        recorder.seed_transition(bb, bt, 1);
        if self.block_length > 1 {
            recorder.seed_transition(et, bt, self.block_length - 1);
        }
        recorder.seed_transition(et, eb, 1);
        if self.sync_period_length > 1 {
            recorder.seed_transition(eb, bb, self.sync_period_length - 1);
        }
        recorder.seed_transition(eb, es, 1);
        recorder.seed_transition(es, bs, 1);

        // A transaction opens on any data operation, uniformly.
        for &xop in &data {
            recorder.seed_transition(bt, xop, 1);
        }

        // Data rows: close the transaction with probability
        // 1/transaction-length, otherwise continue uniformly.
        for &from in &data {
            recorder.seed_transition(from, et, d);
            if self.transaction_length > 1 {
                for &to in &data {
                    recorder.seed_transition(from, to, self.transaction_length - 1);
                }
            }
        }

        for depth in 0..self.snapshot_depth {
            recorder.seed_snapshot_delta(depth, 1);
        }

        recorder.seed_arguments(self.contracts, self.keys, self.values);
        Ok(recorder)
    }
}

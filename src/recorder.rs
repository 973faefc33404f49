//! Markovian event recorder
//!
//! The recorder turns a stream of state-database operations into the raw
//! material of the stochastic model: per-extended-operation frequencies, a
//! first-order transition table, the three argument classifiers, the
//! snapshot-delta histogram, and the scalar distributions.
//!
//! Counting is monotone (nothing ever decreases) and the tables are keyed
//! by the integer XOp encoding in `BTreeMap`s so exports iterate in a stable
//! canonical order.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeMap;

use crate::classifier::{ArgKind, Classifier, ClassifierStats};
use crate::opcode::{CodecError, Op, XOp};
use crate::scalar::{ScalarDistribution, ScalarStats};
use crate::{Address, Key, Value, NUM_ECDF_POINTS, QUEUE_LEN};

/// Errors raised while recording.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// The operation/argument combination violates the operation's arity.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Accumulates operation and transition frequencies over the enriched
/// operation alphabet, together with the argument and scalar statistics.
#[derive(Debug, Clone)]
pub struct Recorder {
    /// Occurrence count per encoded XOp.
    op_freq: BTreeMap<usize, u64>,
    /// Successor counts: `(from, to) → count`.
    transit_freq: BTreeMap<(usize, usize), u64>,
    /// Previously observed XOp; `None` before the first operation.
    prev: Option<usize>,

    contracts: Classifier<Address>,
    keys: Classifier<Key>,
    values: Classifier<Value>,

    /// Histogram of snapshot-revert depths (distance from the stack top).
    snapshot_freq: BTreeMap<u64, u64>,

    balance: ScalarDistribution,
    nonce: ScalarDistribution,
    code_size: ScalarDistribution,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            op_freq: BTreeMap::new(),
            transit_freq: BTreeMap::new(),
            prev: None,
            contracts: Classifier::new(QUEUE_LEN),
            keys: Classifier::new(QUEUE_LEN),
            values: Classifier::new(QUEUE_LEN),
            snapshot_freq: BTreeMap::new(),
            balance: ScalarDistribution::new(),
            nonce: ScalarDistribution::new(),
            code_size: ScalarDistribution::new(),
        }
    }

    /// Update the frequency and transition tables with the next observed
    /// extended operation. The first observation only initialises the chain;
    /// no transition is counted for it.
    fn observe(&mut self, xop: XOp) {
        let code = xop.encode();
        *self.op_freq.entry(code).or_insert(0) += 1;
        if let Some(prev) = self.prev {
            *self.transit_freq.entry((prev, code)).or_insert(0) += 1;
        }
        self.prev = Some(code);
    }

    /// Record an argument-less operation. Fails when `op` consumes arguments.
    pub fn count_op(&mut self, op: Op) -> Result<(), RecorderError> {
        let xop = XOp::new(op, [ArgKind::NoArg; 3])?;
        self.observe(xop);
        Ok(())
    }

    /// Record an address-consuming operation.
    pub fn count_addr_op(&mut self, op: Op, addr: Address) -> Result<(), RecorderError> {
        let ka = self.contracts.classify(&addr);
        let xop = XOp::new(op, [ka, ArgKind::NoArg, ArgKind::NoArg])?;
        self.observe(xop);
        Ok(())
    }

    /// Record an (address, key) operation. Arguments classify in slot order.
    pub fn count_key_op(&mut self, op: Op, addr: Address, key: Key) -> Result<(), RecorderError> {
        let ka = self.contracts.classify(&addr);
        let kk = self.keys.classify(&key);
        let xop = XOp::new(op, [ka, kk, ArgKind::NoArg])?;
        self.observe(xop);
        Ok(())
    }

    /// Record an (address, key, value) operation.
    pub fn count_value_op(
        &mut self,
        op: Op,
        addr: Address,
        key: Key,
        value: Value,
    ) -> Result<(), RecorderError> {
        let ka = self.contracts.classify(&addr);
        let kk = self.keys.classify(&key);
        let kv = self.values.classify(&value);
        let xop = XOp::new(op, [ka, kk, kv])?;
        self.observe(xop);
        Ok(())
    }

    /// Record a snapshot revert with the given depth-from-top delta.
    pub fn count_snapshot(&mut self, delta: u64) -> Result<(), RecorderError> {
        self.count_op(Op::RevertToSnapshot)?;
        *self.snapshot_freq.entry(delta).or_insert(0) += 1;
        Ok(())
    }

    /// Record a balance change magnitude. Negative deltas clamp to zero.
    pub fn record_balance_change(&mut self, delta: i128) {
        let clamped = if delta < 0 {
            0u64
        } else {
            u64::try_from(delta).unwrap_or(u64::MAX)
        };
        self.balance.record(clamped);
    }

    /// Record a nonce value; over-range values saturate at `i64::MAX`.
    pub fn record_nonce(&mut self, nonce: u64) {
        self.nonce.record(nonce.min(i64::MAX as u64));
    }

    /// Record a code size. Negative sizes are ignored.
    pub fn record_code_size(&mut self, size: i64) {
        if size >= 0 {
            self.code_size.record(size as u64);
        }
    }

    // ------------------------------------------------------------------
    // Snapshot accessors (consumed by the model export)
    // ------------------------------------------------------------------

    /// Encoded XOps observed at least once, in canonical (encoding) order.
    pub fn observed_ops(&self) -> Vec<usize> {
        self.op_freq.keys().copied().collect()
    }

    pub fn op_frequencies(&self) -> &BTreeMap<usize, u64> {
        &self.op_freq
    }

    pub fn transitions(&self) -> &BTreeMap<(usize, usize), u64> {
        &self.transit_freq
    }

    pub fn contract_stats(&self) -> ClassifierStats {
        self.contracts.export_stats(NUM_ECDF_POINTS)
    }

    pub fn key_stats(&self) -> ClassifierStats {
        self.keys.export_stats(NUM_ECDF_POINTS)
    }

    pub fn value_stats(&self) -> ClassifierStats {
        self.values.export_stats(NUM_ECDF_POINTS)
    }

    /// `(delta, count)` pairs of the snapshot-depth histogram.
    pub fn snapshot_pairs(&self) -> Vec<(u64, u64)> {
        self.snapshot_freq.iter().map(|(&d, &c)| (d, c)).collect()
    }

    pub fn balance_stats(&self) -> Option<ScalarStats> {
        self.balance.export(NUM_ECDF_POINTS)
    }

    pub fn nonce_stats(&self) -> Option<ScalarStats> {
        self.nonce.export(NUM_ECDF_POINTS)
    }

    pub fn code_size_stats(&self) -> Option<ScalarStats> {
        self.code_size.export(NUM_ECDF_POINTS)
    }

    // ------------------------------------------------------------------
    // Direct seeding (uniform-model construction)
    // ------------------------------------------------------------------

    /// Seed an operation frequency without classifying arguments.
    pub fn seed_op(&mut self, xop: XOp, count: u64) {
        *self.op_freq.entry(xop.encode()).or_insert(0) += count;
    }

    /// Seed a transition without observing an operation stream.
    pub fn seed_transition(&mut self, from: XOp, to: XOp, count: u64) {
        *self.transit_freq.entry((from.encode(), to.encode())).or_insert(0) += count;
    }

    /// Seed the snapshot-depth histogram directly.
    pub fn seed_snapshot_delta(&mut self, delta: u64, count: u64) {
        *self.snapshot_freq.entry(delta).or_insert(0) += count;
    }

    /// Seed the classifiers with synthetic argument universes of the given
    /// cardinalities, one sighting per value.
    pub fn seed_arguments(&mut self, contracts: u64, keys: u64, values: u64) {
        for i in 1..=contracts {
            self.contracts.place(&crate::address::index_to_address(i));
        }
        for i in 1..=keys {
            self.keys.place(&crate::address::index_to_hash(i));
        }
        for i in 1..=values {
            self.values.place(&crate::address::index_to_hash(i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        let mut a = [0u8; 20];
        a[0] = b;
        a
    }

    fn key(b: u8) -> Key {
        let mut k = [0u8; 32];
        k[0] = b;
        k
    }

    #[test]
    fn recorder_frequency_chain() {
        // CreateAccount(0x10), GetState(0x10, 0x200), SetState(0x10, 0x200, 0),
        // Snapshot: four distinct XOps, three chained transitions.
        let mut r = Recorder::new();
        r.count_addr_op(Op::CreateAccount, addr(0x10)).unwrap();
        r.count_key_op(Op::GetState, addr(0x10), key(0x20)).unwrap();
        r.count_value_op(Op::SetState, addr(0x10), key(0x20), [0u8; 32])
            .unwrap();
        r.count_op(Op::Snapshot).unwrap();

        let freqs = r.op_frequencies();
        assert_eq!(freqs.len(), 4);
        assert!(freqs.values().all(|&c| c == 1));

        let transitions = r.transitions();
        assert_eq!(transitions.len(), 3);
        assert!(transitions.values().all(|&c| c == 1));

        // The chain is in observation order.
        let expected = [
            XOp::new(Op::CreateAccount, [ArgKind::NewArg, ArgKind::NoArg, ArgKind::NoArg])
                .unwrap()
                .encode(),
            XOp::new(Op::GetState, [ArgKind::PrevArg, ArgKind::NewArg, ArgKind::NoArg])
                .unwrap()
                .encode(),
            XOp::new(Op::SetState, [ArgKind::PrevArg, ArgKind::PrevArg, ArgKind::ZeroArg])
                .unwrap()
                .encode(),
            XOp::nullary(Op::Snapshot).encode(),
        ];
        for pair in expected.windows(2) {
            assert_eq!(transitions.get(&(pair[0], pair[1])), Some(&1));
        }
    }

    #[test]
    fn count_op_rejects_argument_taking_ops() {
        let mut r = Recorder::new();
        assert!(r.count_op(Op::GetBalance).is_err());
        assert!(r.count_addr_op(Op::Snapshot, addr(1)).is_err());
        assert!(r.count_key_op(Op::GetBalance, addr(1), key(1)).is_err());
    }

    #[test]
    fn outgoing_transitions_bounded_by_op_frequency() {
        let mut r = Recorder::new();
        for i in 0..20u8 {
            r.count_addr_op(Op::GetBalance, addr(i % 3)).unwrap();
        }
        let freqs = r.op_frequencies();
        for (&from, &f) in freqs {
            let outgoing: u64 = r
                .transitions()
                .iter()
                .filter(|&(&(a, _), _)| a == from)
                .map(|(_, &c)| c)
                .sum();
            assert!(outgoing <= f, "row {from} exceeds its op frequency");
        }
        // Only the final observed op is missing an outgoing transition.
        let total_ops: u64 = freqs.values().sum();
        let total_transitions: u64 = r.transitions().values().sum();
        assert_eq!(total_transitions, total_ops - 1);
    }

    #[test]
    fn snapshot_delta_histogram() {
        let mut r = Recorder::new();
        r.count_snapshot(2).unwrap();
        r.count_snapshot(2).unwrap();
        r.count_snapshot(0).unwrap();
        assert_eq!(r.snapshot_pairs(), vec![(0, 1), (2, 2)]);
        let rs = XOp::nullary(Op::RevertToSnapshot).encode();
        assert_eq!(r.op_frequencies().get(&rs), Some(&3));
    }

    #[test]
    fn scalar_clamping_rules() {
        let mut r = Recorder::new();
        r.record_balance_change(-5);
        r.record_balance_change(100);
        r.record_nonce(u64::MAX);
        r.record_code_size(-1);
        r.record_code_size(24_576);
        assert_eq!(r.balance_stats().unwrap().max, 100);
        assert_eq!(r.nonce_stats().unwrap().max, i64::MAX as u64);
        assert_eq!(r.code_size_stats().unwrap().max, 24_576);
    }
}

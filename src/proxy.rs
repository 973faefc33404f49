//! Recording proxy over a state database
//!
//! `RecorderProxy` decorates any [`StateDb`]: every call is forwarded to the
//! wrapped backend first (backend-issued identifiers must exist before the
//! recorder needs them) and then reported to the [`Recorder`]. Observable
//! backend behaviour is never altered: results and errors pass through
//! verbatim, and a backend error suppresses the recording of the failed call.
//!
//! The proxy also owns the snapshot stack used to derive revert deltas. The
//! stack holds opaque backend ids; it is a one-way view that is pruned on
//! revert and cleared at transaction boundaries.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::opcode::Op;
use crate::recorder::Recorder;
use crate::statedb::{StateDb, StateDbError};
use crate::{Address, Hash32, Key, Value};

/// A [`StateDb`] decorator feeding a [`Recorder`].
#[derive(Debug)]
pub struct RecorderProxy<D> {
    db: D,
    recorder: Recorder,
    /// Backend-issued snapshot ids, oldest first.
    snapshots: Vec<u64>,
}

impl<D: StateDb> RecorderProxy<D> {
    /// Wrap `db`, feeding `recorder`.
    pub fn new(db: D, recorder: Recorder) -> Self {
        Self {
            db,
            recorder,
            snapshots: Vec::new(),
        }
    }

    /// Tear down the proxy, returning the backend and the finalised
    /// recorder.
    pub fn into_parts(self) -> (D, Recorder) {
        (self.db, self.recorder)
    }

    /// Read-only view of the recorder mid-recording.
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Depth of the proxy's snapshot stack.
    pub fn snapshot_depth(&self) -> usize {
        self.snapshots.len()
    }

    fn count_op(&mut self, op: Op) {
        self.recorder
            .count_op(op)
            .expect("arity matches by construction");
    }

    fn count_addr(&mut self, op: Op, addr: Address) {
        self.recorder
            .count_addr_op(op, addr)
            .expect("arity matches by construction");
    }

    fn count_key(&mut self, op: Op, addr: Address, key: Key) {
        self.recorder
            .count_key_op(op, addr, key)
            .expect("arity matches by construction");
    }

    fn count_value(&mut self, op: Op, addr: Address, key: Key, value: Value) {
        self.recorder
            .count_value_op(op, addr, key, value)
            .expect("arity matches by construction");
    }
}

impl<D: StateDb> StateDb for RecorderProxy<D> {
    fn create_account(&mut self, addr: Address) -> Result<(), StateDbError> {
        self.db.create_account(addr)?;
        self.count_addr(Op::CreateAccount, addr);
        Ok(())
    }

    fn create_contract(&mut self, addr: Address) -> Result<(), StateDbError> {
        self.db.create_contract(addr)?;
        self.count_addr(Op::CreateContract, addr);
        Ok(())
    }

    fn empty(&mut self, addr: Address) -> Result<bool, StateDbError> {
        let out = self.db.empty(addr)?;
        self.count_addr(Op::Empty, addr);
        Ok(out)
    }

    fn exist(&mut self, addr: Address) -> Result<bool, StateDbError> {
        let out = self.db.exist(addr)?;
        self.count_addr(Op::Exist, addr);
        Ok(out)
    }

    fn get_balance(&mut self, addr: Address) -> Result<u128, StateDbError> {
        let out = self.db.get_balance(addr)?;
        self.count_addr(Op::GetBalance, addr);
        Ok(out)
    }

    fn add_balance(&mut self, addr: Address, amount: u128) -> Result<(), StateDbError> {
        self.db.add_balance(addr, amount)?;
        self.count_addr(Op::AddBalance, addr);
        self.recorder
            .record_balance_change(i128::try_from(amount).unwrap_or(i128::MAX));
        Ok(())
    }

    fn sub_balance(&mut self, addr: Address, amount: u128) -> Result<(), StateDbError> {
        self.db.sub_balance(addr, amount)?;
        self.count_addr(Op::SubBalance, addr);
        self.recorder
            .record_balance_change(i128::try_from(amount).unwrap_or(i128::MAX));
        Ok(())
    }

    fn get_nonce(&mut self, addr: Address) -> Result<u64, StateDbError> {
        let out = self.db.get_nonce(addr)?;
        self.count_addr(Op::GetNonce, addr);
        Ok(out)
    }

    fn set_nonce(&mut self, addr: Address, nonce: u64) -> Result<(), StateDbError> {
        self.db.set_nonce(addr, nonce)?;
        self.count_addr(Op::SetNonce, addr);
        self.recorder.record_nonce(nonce);
        Ok(())
    }

    fn get_code(&mut self, addr: Address) -> Result<Vec<u8>, StateDbError> {
        let out = self.db.get_code(addr)?;
        self.count_addr(Op::GetCode, addr);
        Ok(out)
    }

    fn set_code(&mut self, addr: Address, code: Vec<u8>) -> Result<(), StateDbError> {
        let size = code.len();
        self.db.set_code(addr, code)?;
        self.count_addr(Op::SetCode, addr);
        self.recorder.record_code_size(size as i64);
        Ok(())
    }

    fn get_code_hash(&mut self, addr: Address) -> Result<Hash32, StateDbError> {
        let out = self.db.get_code_hash(addr)?;
        self.count_addr(Op::GetCodeHash, addr);
        Ok(out)
    }

    fn get_code_size(&mut self, addr: Address) -> Result<usize, StateDbError> {
        let out = self.db.get_code_size(addr)?;
        self.count_addr(Op::GetCodeSize, addr);
        Ok(out)
    }

    fn get_state(&mut self, addr: Address, key: Key) -> Result<Value, StateDbError> {
        let out = self.db.get_state(addr, key)?;
        self.count_key(Op::GetState, addr, key);
        Ok(out)
    }

    fn set_state(
        &mut self,
        addr: Address,
        key: Key,
        value: Value,
    ) -> Result<(), StateDbError> {
        self.db.set_state(addr, key, value)?;
        self.count_value(Op::SetState, addr, key, value);
        Ok(())
    }

    fn get_committed_state(&mut self, addr: Address, key: Key) -> Result<Value, StateDbError> {
        let out = self.db.get_committed_state(addr, key)?;
        self.count_key(Op::GetCommittedState, addr, key);
        Ok(out)
    }

    fn get_transient_state(&mut self, addr: Address, key: Key) -> Result<Value, StateDbError> {
        let out = self.db.get_transient_state(addr, key)?;
        self.count_key(Op::GetTransientState, addr, key);
        Ok(out)
    }

    fn set_transient_state(
        &mut self,
        addr: Address,
        key: Key,
        value: Value,
    ) -> Result<(), StateDbError> {
        self.db.set_transient_state(addr, key, value)?;
        self.count_value(Op::SetTransientState, addr, key, value);
        Ok(())
    }

    fn snapshot(&mut self) -> Result<u64, StateDbError> {
        let id = self.db.snapshot()?;
        self.count_op(Op::Snapshot);
        self.snapshots.push(id);
        Ok(id)
    }

    fn revert_to_snapshot(&mut self, id: u64) -> Result<(), StateDbError> {
        self.db.revert_to_snapshot(id)?;
        if let Some(idx) = self.snapshots.iter().rposition(|&sid| sid == id) {
            let delta = (self.snapshots.len() - 1 - idx) as u64;
            self.recorder
                .count_snapshot(delta)
                .expect("arity matches by construction");
            // One-way pruning: everything above the target is gone, the
            // target itself stays revertible.
            self.snapshots.truncate(idx + 1);
        }
        Ok(())
    }

    fn has_self_destructed(&mut self, addr: Address) -> Result<bool, StateDbError> {
        let out = self.db.has_self_destructed(addr)?;
        self.count_addr(Op::HasSelfDestructed, addr);
        Ok(out)
    }

    fn self_destruct(&mut self, addr: Address) -> Result<(), StateDbError> {
        self.db.self_destruct(addr)?;
        self.count_addr(Op::SelfDestruct, addr);
        Ok(())
    }

    fn self_destruct_6780(&mut self, addr: Address) -> Result<(u128, bool), StateDbError> {
        let out = self.db.self_destruct_6780(addr)?;
        self.count_addr(Op::SelfDestruct6780, addr);
        Ok(out)
    }

    fn begin_sync_period(&mut self, number: u64) -> Result<(), StateDbError> {
        self.db.begin_sync_period(number)?;
        self.count_op(Op::BeginSyncPeriod);
        Ok(())
    }

    fn end_sync_period(&mut self) -> Result<(), StateDbError> {
        self.db.end_sync_period()?;
        self.count_op(Op::EndSyncPeriod);
        Ok(())
    }

    fn begin_block(&mut self, number: u64) -> Result<(), StateDbError> {
        self.db.begin_block(number)?;
        self.count_op(Op::BeginBlock);
        Ok(())
    }

    fn end_block(&mut self) -> Result<(), StateDbError> {
        self.db.end_block()?;
        self.count_op(Op::EndBlock);
        Ok(())
    }

    fn begin_transaction(&mut self, number: u32) -> Result<(), StateDbError> {
        self.db.begin_transaction(number)?;
        self.count_op(Op::BeginTransaction);
        self.snapshots.clear();
        Ok(())
    }

    fn end_transaction(&mut self) -> Result<(), StateDbError> {
        self.db.end_transaction()?;
        self.count_op(Op::EndTransaction);
        self.snapshots.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::XOp;
    use crate::statedb::InMemoryStateDb;

    fn addr(b: u8) -> Address {
        let mut a = [0u8; 20];
        a[19] = b;
        a
    }

    fn proxy_in_tx() -> RecorderProxy<InMemoryStateDb> {
        let mut p = RecorderProxy::new(InMemoryStateDb::new(), Recorder::new());
        p.begin_sync_period(0).unwrap();
        p.begin_block(0).unwrap();
        p.begin_transaction(0).unwrap();
        p
    }

    #[test]
    fn revert_records_depth_from_top() {
        // Three snapshots, revert to the first: two were taken above it.
        let mut p = proxy_in_tx();
        let first = p.snapshot().unwrap();
        let _ = p.snapshot().unwrap();
        let _ = p.snapshot().unwrap();
        p.revert_to_snapshot(first).unwrap();

        let (_, recorder) = p.into_parts();
        assert_eq!(recorder.snapshot_pairs(), vec![(2, 1)]);
    }

    #[test]
    fn revert_prunes_but_keeps_target() {
        let mut p = proxy_in_tx();
        let first = p.snapshot().unwrap();
        let _ = p.snapshot().unwrap();
        p.revert_to_snapshot(first).unwrap();
        assert_eq!(p.snapshot_depth(), 1);
        p.revert_to_snapshot(first).unwrap();
        let (_, recorder) = p.into_parts();
        assert_eq!(recorder.snapshot_pairs(), vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn transaction_boundaries_clear_the_stack() {
        let mut p = proxy_in_tx();
        let _ = p.snapshot().unwrap();
        let _ = p.snapshot().unwrap();
        assert_eq!(p.snapshot_depth(), 2);
        p.end_transaction().unwrap();
        assert_eq!(p.snapshot_depth(), 0);
    }

    #[test]
    fn forwarding_preserves_backend_results() {
        let mut p = proxy_in_tx();
        p.create_account(addr(1)).unwrap();
        p.add_balance(addr(1), 250).unwrap();
        assert_eq!(p.get_balance(addr(1)).unwrap(), 250);
        assert!(p.exist(addr(1)).unwrap());
        assert!(!p.exist(addr(9)).unwrap());
        // A backend error passes through and records nothing for the call.
        assert!(p.sub_balance(addr(1), 1000).is_err());
        let (_, recorder) = p.into_parts();
        let sb_observed = recorder
            .observed_ops()
            .into_iter()
            .any(|c| XOp::decode(c).unwrap().op == Op::SubBalance);
        assert!(!sb_observed);
    }

    #[test]
    fn scalar_stats_flow_through_the_proxy() {
        let mut p = proxy_in_tx();
        p.create_account(addr(1)).unwrap();
        p.add_balance(addr(1), 77).unwrap();
        p.set_nonce(addr(1), 3).unwrap();
        p.set_code(addr(1), vec![0u8; 64]).unwrap();
        let (_, recorder) = p.into_parts();
        assert_eq!(recorder.balance_stats().unwrap().max, 77);
        assert_eq!(recorder.nonce_stats().unwrap().max, 3);
        assert_eq!(recorder.code_size_stats().unwrap().max, 64);
    }
}

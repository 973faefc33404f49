//! State-database capability set and reference backend
//!
//! [`StateDb`] is the seam between the workload model and whatever database
//! executes it: the recorder proxy decorates an implementation, the replayer
//! drives one directly. All methods take `&mut self`, even the reads, so a
//! decorator can observe every call.
//!
//! [`InMemoryStateDb`] is the crate's reference backend: a plain map-based
//! store with clone-based snapshots and strict framing checks. It is the
//! replay target of the command binaries and the fixture for the pipeline
//! tests; it makes no attempt at being a production database.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};

use crate::{Address, Hash32, Key, Value};

/// Errors surfaced by a state database.
#[derive(Debug, thiserror::Error)]
pub enum StateDbError {
    #[error("unknown snapshot id {0}")]
    UnknownSnapshot(u64),
    #[error("framing violation: {0}")]
    Framing(&'static str),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Capability set of a state database (accounts, storage, snapshots,
/// structural framing).
pub trait StateDb {
    fn create_account(&mut self, addr: Address) -> Result<(), StateDbError>;
    fn create_contract(&mut self, addr: Address) -> Result<(), StateDbError>;
    fn empty(&mut self, addr: Address) -> Result<bool, StateDbError>;
    fn exist(&mut self, addr: Address) -> Result<bool, StateDbError>;

    fn get_balance(&mut self, addr: Address) -> Result<u128, StateDbError>;
    fn add_balance(&mut self, addr: Address, amount: u128) -> Result<(), StateDbError>;
    fn sub_balance(&mut self, addr: Address, amount: u128) -> Result<(), StateDbError>;

    fn get_nonce(&mut self, addr: Address) -> Result<u64, StateDbError>;
    fn set_nonce(&mut self, addr: Address, nonce: u64) -> Result<(), StateDbError>;

    fn get_code(&mut self, addr: Address) -> Result<Vec<u8>, StateDbError>;
    fn set_code(&mut self, addr: Address, code: Vec<u8>) -> Result<(), StateDbError>;
    fn get_code_hash(&mut self, addr: Address) -> Result<Hash32, StateDbError>;
    fn get_code_size(&mut self, addr: Address) -> Result<usize, StateDbError>;

    fn get_state(&mut self, addr: Address, key: Key) -> Result<Value, StateDbError>;
    fn set_state(&mut self, addr: Address, key: Key, value: Value)
        -> Result<(), StateDbError>;
    fn get_committed_state(&mut self, addr: Address, key: Key) -> Result<Value, StateDbError>;
    fn get_transient_state(&mut self, addr: Address, key: Key) -> Result<Value, StateDbError>;
    fn set_transient_state(
        &mut self,
        addr: Address,
        key: Key,
        value: Value,
    ) -> Result<(), StateDbError>;

    fn snapshot(&mut self) -> Result<u64, StateDbError>;
    fn revert_to_snapshot(&mut self, id: u64) -> Result<(), StateDbError>;

    fn has_self_destructed(&mut self, addr: Address) -> Result<bool, StateDbError>;
    fn self_destruct(&mut self, addr: Address) -> Result<(), StateDbError>;
    /// EIP-6780 semantics: destroy only when the contract was created in the
    /// current transaction. Returns the balance and whether it was destroyed.
    fn self_destruct_6780(&mut self, addr: Address) -> Result<(u128, bool), StateDbError>;

    fn begin_sync_period(&mut self, number: u64) -> Result<(), StateDbError>;
    fn end_sync_period(&mut self) -> Result<(), StateDbError>;
    fn begin_block(&mut self, number: u64) -> Result<(), StateDbError>;
    fn end_block(&mut self) -> Result<(), StateDbError>;
    fn begin_transaction(&mut self, number: u32) -> Result<(), StateDbError>;
    fn end_transaction(&mut self) -> Result<(), StateDbError>;
}

#[derive(Debug, Clone, Default)]
struct Account {
    balance: u128,
    nonce: u64,
    code: Vec<u8>,
    self_destructed: bool,
}

/// World state captured by a snapshot. Clone-based; good enough for a
/// reference backend.
#[derive(Debug, Clone, Default)]
struct World {
    accounts: HashMap<Address, Account>,
    storage: HashMap<Address, HashMap<Key, Value>>,
    transient: HashMap<Address, HashMap<Key, Value>>,
    created_this_tx: HashSet<Address>,
}

/// Map-based reference implementation of [`StateDb`].
#[derive(Debug, Default)]
pub struct InMemoryStateDb {
    world: World,
    /// Storage as of the start of the current transaction.
    committed: HashMap<Address, HashMap<Key, Value>>,
    snapshots: Vec<(u64, World)>,
    next_snapshot_id: u64,
    in_sync_period: bool,
    in_block: bool,
    in_transaction: bool,
}

impl InMemoryStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts currently present.
    pub fn account_count(&self) -> usize {
        self.world.accounts.len()
    }

    /// Depth of the live snapshot stack.
    pub fn snapshot_depth(&self) -> usize {
        self.snapshots.len()
    }

    /// Deterministic digest of the world state (accounts and storage in
    /// address order). Two runs with the same seed produce the same digest.
    pub fn state_digest(&self) -> Hash32 {
        let mut hasher = blake3::Hasher::new();
        let mut addrs: Vec<&Address> = self.world.accounts.keys().collect();
        addrs.sort_unstable();
        for addr in addrs {
            let acct = &self.world.accounts[addr];
            hasher.update(addr);
            hasher.update(&acct.balance.to_be_bytes());
            hasher.update(&acct.nonce.to_be_bytes());
            hasher.update(&(acct.code.len() as u64).to_be_bytes());
            hasher.update(&acct.code);
            if let Some(slots) = self.world.storage.get(addr) {
                let mut keys: Vec<&Key> = slots.keys().collect();
                keys.sort_unstable();
                for key in keys {
                    hasher.update(key);
                    hasher.update(&slots[key]);
                }
            }
        }
        *hasher.finalize().as_bytes()
    }

    fn account_mut(&mut self, addr: Address) -> &mut Account {
        self.world.accounts.entry(addr).or_default()
    }
}

impl StateDb for InMemoryStateDb {
    fn create_account(&mut self, addr: Address) -> Result<(), StateDbError> {
        self.world.accounts.insert(addr, Account::default());
        Ok(())
    }

    fn create_contract(&mut self, addr: Address) -> Result<(), StateDbError> {
        self.world.accounts.entry(addr).or_default();
        self.world.created_this_tx.insert(addr);
        Ok(())
    }

    fn empty(&mut self, addr: Address) -> Result<bool, StateDbError> {
        Ok(match self.world.accounts.get(&addr) {
            Some(a) => a.balance == 0 && a.nonce == 0 && a.code.is_empty(),
            None => true,
        })
    }

    fn exist(&mut self, addr: Address) -> Result<bool, StateDbError> {
        Ok(self.world.accounts.contains_key(&addr))
    }

    fn get_balance(&mut self, addr: Address) -> Result<u128, StateDbError> {
        Ok(self.world.accounts.get(&addr).map(|a| a.balance).unwrap_or(0))
    }

    fn add_balance(&mut self, addr: Address, amount: u128) -> Result<(), StateDbError> {
        let acct = self.account_mut(addr);
        acct.balance = acct.balance.saturating_add(amount);
        Ok(())
    }

    fn sub_balance(&mut self, addr: Address, amount: u128) -> Result<(), StateDbError> {
        let balance = self.get_balance(addr)?;
        if amount > balance {
            return Err(StateDbError::Backend(format!(
                "balance underflow: {} < {}",
                balance, amount
            )));
        }
        self.account_mut(addr).balance = balance - amount;
        Ok(())
    }

    fn get_nonce(&mut self, addr: Address) -> Result<u64, StateDbError> {
        Ok(self.world.accounts.get(&addr).map(|a| a.nonce).unwrap_or(0))
    }

    fn set_nonce(&mut self, addr: Address, nonce: u64) -> Result<(), StateDbError> {
        self.account_mut(addr).nonce = nonce;
        Ok(())
    }

    fn get_code(&mut self, addr: Address) -> Result<Vec<u8>, StateDbError> {
        Ok(self
            .world
            .accounts
            .get(&addr)
            .map(|a| a.code.clone())
            .unwrap_or_default())
    }

    fn set_code(&mut self, addr: Address, code: Vec<u8>) -> Result<(), StateDbError> {
        self.account_mut(addr).code = code;
        Ok(())
    }

    fn get_code_hash(&mut self, addr: Address) -> Result<Hash32, StateDbError> {
        Ok(match self.world.accounts.get(&addr) {
            Some(a) if !a.code.is_empty() => *blake3::hash(&a.code).as_bytes(),
            _ => [0u8; 32],
        })
    }

    fn get_code_size(&mut self, addr: Address) -> Result<usize, StateDbError> {
        Ok(self.world.accounts.get(&addr).map(|a| a.code.len()).unwrap_or(0))
    }

    fn get_state(&mut self, addr: Address, key: Key) -> Result<Value, StateDbError> {
        Ok(self
            .world
            .storage
            .get(&addr)
            .and_then(|s| s.get(&key))
            .copied()
            .unwrap_or([0u8; 32]))
    }

    fn set_state(
        &mut self,
        addr: Address,
        key: Key,
        value: Value,
    ) -> Result<(), StateDbError> {
        self.world.storage.entry(addr).or_default().insert(key, value);
        Ok(())
    }

    fn get_committed_state(&mut self, addr: Address, key: Key) -> Result<Value, StateDbError> {
        Ok(self
            .committed
            .get(&addr)
            .and_then(|s| s.get(&key))
            .copied()
            .unwrap_or([0u8; 32]))
    }

    fn get_transient_state(&mut self, addr: Address, key: Key) -> Result<Value, StateDbError> {
        Ok(self
            .world
            .transient
            .get(&addr)
            .and_then(|s| s.get(&key))
            .copied()
            .unwrap_or([0u8; 32]))
    }

    fn set_transient_state(
        &mut self,
        addr: Address,
        key: Key,
        value: Value,
    ) -> Result<(), StateDbError> {
        self.world.transient.entry(addr).or_default().insert(key, value);
        Ok(())
    }

    fn snapshot(&mut self) -> Result<u64, StateDbError> {
        let id = self.next_snapshot_id;
        self.next_snapshot_id += 1;
        self.snapshots.push((id, self.world.clone()));
        Ok(id)
    }

    fn revert_to_snapshot(&mut self, id: u64) -> Result<(), StateDbError> {
        let idx = self
            .snapshots
            .iter()
            .rposition(|&(sid, _)| sid == id)
            .ok_or(StateDbError::UnknownSnapshot(id))?;
        self.world = self.snapshots[idx].1.clone();
        // The target stays revertible; everything taken after it is pruned.
        self.snapshots.truncate(idx + 1);
        Ok(())
    }

    fn has_self_destructed(&mut self, addr: Address) -> Result<bool, StateDbError> {
        Ok(self
            .world
            .accounts
            .get(&addr)
            .map(|a| a.self_destructed)
            .unwrap_or(false))
    }

    fn self_destruct(&mut self, addr: Address) -> Result<(), StateDbError> {
        let acct = self.account_mut(addr);
        acct.self_destructed = true;
        acct.balance = 0;
        Ok(())
    }

    fn self_destruct_6780(&mut self, addr: Address) -> Result<(u128, bool), StateDbError> {
        let created_now = self.world.created_this_tx.contains(&addr);
        let balance = self.get_balance(addr)?;
        if created_now {
            self.self_destruct(addr)?;
        }
        Ok((balance, created_now))
    }

    fn begin_sync_period(&mut self, _number: u64) -> Result<(), StateDbError> {
        if self.in_sync_period {
            return Err(StateDbError::Framing("sync period already open"));
        }
        self.in_sync_period = true;
        Ok(())
    }

    fn end_sync_period(&mut self) -> Result<(), StateDbError> {
        if !self.in_sync_period || self.in_block {
            return Err(StateDbError::Framing("no closable sync period"));
        }
        self.in_sync_period = false;
        Ok(())
    }

    fn begin_block(&mut self, _number: u64) -> Result<(), StateDbError> {
        if !self.in_sync_period || self.in_block {
            return Err(StateDbError::Framing("block must open inside a sync period"));
        }
        self.in_block = true;
        Ok(())
    }

    fn end_block(&mut self) -> Result<(), StateDbError> {
        if !self.in_block || self.in_transaction {
            return Err(StateDbError::Framing("no closable block"));
        }
        // State clearing: accounts flagged during the block's transactions
        // disappear with the block.
        self.world.accounts.retain(|_, a| !a.self_destructed);
        self.in_block = false;
        Ok(())
    }

    fn begin_transaction(&mut self, _number: u32) -> Result<(), StateDbError> {
        if !self.in_block || self.in_transaction {
            return Err(StateDbError::Framing("transaction must open inside a block"));
        }
        self.in_transaction = true;
        self.committed = self.world.storage.clone();
        self.world.created_this_tx.clear();
        Ok(())
    }

    fn end_transaction(&mut self) -> Result<(), StateDbError> {
        if !self.in_transaction {
            return Err(StateDbError::Framing("no open transaction"));
        }
        self.in_transaction = false;
        // Transient storage and snapshots do not outlive the transaction.
        self.world.transient.clear();
        self.snapshots.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        let mut a = [0u8; 20];
        a[19] = b;
        a
    }

    fn key(b: u8) -> Key {
        let mut k = [0u8; 32];
        k[31] = b;
        k
    }

    fn open_tx(db: &mut InMemoryStateDb) {
        db.begin_sync_period(0).unwrap();
        db.begin_block(0).unwrap();
        db.begin_transaction(0).unwrap();
    }

    #[test]
    fn balances_and_nonces() {
        let mut db = InMemoryStateDb::new();
        open_tx(&mut db);
        db.create_account(addr(1)).unwrap();
        db.add_balance(addr(1), 100).unwrap();
        db.sub_balance(addr(1), 40).unwrap();
        assert_eq!(db.get_balance(addr(1)).unwrap(), 60);
        assert!(db.sub_balance(addr(1), 100).is_err());
        db.set_nonce(addr(1), 7).unwrap();
        assert_eq!(db.get_nonce(addr(1)).unwrap(), 7);
        assert!(!db.empty(addr(1)).unwrap());
    }

    #[test]
    fn snapshot_revert_restores_state() {
        let mut db = InMemoryStateDb::new();
        open_tx(&mut db);
        db.create_account(addr(1)).unwrap();
        db.set_state(addr(1), key(1), [9u8; 32]).unwrap();
        let snap = db.snapshot().unwrap();
        db.set_state(addr(1), key(1), [5u8; 32]).unwrap();
        db.add_balance(addr(1), 10).unwrap();
        db.revert_to_snapshot(snap).unwrap();
        assert_eq!(db.get_state(addr(1), key(1)).unwrap(), [9u8; 32]);
        assert_eq!(db.get_balance(addr(1)).unwrap(), 0);
        // The target itself survives the revert.
        assert_eq!(db.snapshot_depth(), 1);
        assert!(db.revert_to_snapshot(snap).is_ok());
        assert!(db.revert_to_snapshot(999).is_err());
    }

    #[test]
    fn committed_state_is_transaction_start_state() {
        let mut db = InMemoryStateDb::new();
        open_tx(&mut db);
        db.set_state(addr(1), key(1), [1u8; 32]).unwrap();
        db.end_transaction().unwrap();
        db.begin_transaction(1).unwrap();
        db.set_state(addr(1), key(1), [2u8; 32]).unwrap();
        assert_eq!(db.get_state(addr(1), key(1)).unwrap(), [2u8; 32]);
        assert_eq!(db.get_committed_state(addr(1), key(1)).unwrap(), [1u8; 32]);
    }

    #[test]
    fn transient_state_clears_at_transaction_end() {
        let mut db = InMemoryStateDb::new();
        open_tx(&mut db);
        db.set_transient_state(addr(1), key(1), [3u8; 32]).unwrap();
        assert_eq!(db.get_transient_state(addr(1), key(1)).unwrap(), [3u8; 32]);
        db.end_transaction().unwrap();
        db.begin_transaction(1).unwrap();
        assert_eq!(db.get_transient_state(addr(1), key(1)).unwrap(), [0u8; 32]);
    }

    #[test]
    fn self_destruct_6780_only_kills_fresh_contracts() {
        let mut db = InMemoryStateDb::new();
        open_tx(&mut db);
        db.create_contract(addr(1)).unwrap();
        db.add_balance(addr(1), 5).unwrap();
        let (bal, destroyed) = db.self_destruct_6780(addr(1)).unwrap();
        assert_eq!((bal, destroyed), (5, true));

        db.end_transaction().unwrap();
        db.begin_transaction(1).unwrap();
        db.create_account(addr(2)).unwrap();
        db.end_transaction().unwrap();
        db.begin_transaction(2).unwrap();
        let (_, destroyed) = db.self_destruct_6780(addr(2)).unwrap();
        assert!(!destroyed);
    }

    #[test]
    fn destructed_accounts_vanish_at_end_block() {
        let mut db = InMemoryStateDb::new();
        open_tx(&mut db);
        db.create_account(addr(1)).unwrap();
        db.create_account(addr(2)).unwrap();
        db.self_destruct(addr(1)).unwrap();
        assert!(db.has_self_destructed(addr(1)).unwrap());
        db.end_transaction().unwrap();
        db.end_block().unwrap();
        assert_eq!(db.account_count(), 1);
        assert!(!db.exist(addr(1)).unwrap());
    }

    #[test]
    fn state_digest_tracks_world_changes() {
        let mut a = InMemoryStateDb::new();
        let mut b = InMemoryStateDb::new();
        for db in [&mut a, &mut b] {
            open_tx(db);
            db.create_account(addr(1)).unwrap();
            db.add_balance(addr(1), 9).unwrap();
            db.set_state(addr(1), key(1), [4u8; 32]).unwrap();
        }
        assert_eq!(a.state_digest(), b.state_digest());
        b.add_balance(addr(1), 1).unwrap();
        assert_ne!(a.state_digest(), b.state_digest());
    }

    #[test]
    fn framing_nesting_is_strict() {
        let mut db = InMemoryStateDb::new();
        assert!(db.begin_block(0).is_err());
        db.begin_sync_period(0).unwrap();
        assert!(db.begin_transaction(0).is_err());
        db.begin_block(0).unwrap();
        db.begin_transaction(0).unwrap();
        assert!(db.end_block().is_err());
        db.end_transaction().unwrap();
        db.end_block().unwrap();
        db.end_sync_period().unwrap();
        assert!(db.end_sync_period().is_err());
    }

    #[test]
    fn snapshots_do_not_outlive_transactions() {
        let mut db = InMemoryStateDb::new();
        open_tx(&mut db);
        let _ = db.snapshot().unwrap();
        let _ = db.snapshot().unwrap();
        db.end_transaction().unwrap();
        assert_eq!(db.snapshot_depth(), 0);
    }
}

// smart-contracts/src/state.rs

use crate::{
    backend::{account_leaf, storage_leaf, AccountRecord, StateBackend, StateCommit},
    ContractError, ContractResult,
};
use ethers_core::types::{Address, H256, U256};
use evm_core::{Log, Nonce};
use evm_crypto::{keccak256, MerkleProof, MerkleTree, KECCAK_EMPTY};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Live view of one account inside a `StateDb`
#[derive(Debug, Clone)]
struct StateObject {
    account: AccountRecord,
    code: Option<Arc<Vec<u8>>>,
    dirty_code: bool,
    /// Non-zero slots; complete once `storage_loaded` is set
    storage: BTreeMap<H256, H256>,
    storage_loaded: bool,
    /// Storage root needs recomputing at the next commit
    storage_changed: bool,
    deleted: bool,
}

impl StateObject {
    fn from_record(account: AccountRecord) -> Self {
        Self {
            account,
            code: None,
            dirty_code: false,
            storage: BTreeMap::new(),
            storage_loaded: false,
            storage_changed: false,
            deleted: false,
        }
    }

    /// A brand-new account with no storage behind it
    fn fresh() -> Self {
        Self {
            storage_loaded: true,
            storage_changed: true,
            ..Self::from_record(AccountRecord::default())
        }
    }

    fn is_empty(&self) -> bool {
        self.account.is_empty()
    }
}

/// Account state on top of a content-addressed backend.
///
/// Reads fall through to the account set committed under `root`. Writes stay
/// in memory until `commit` hashes them into a new root and hands the new
/// nodes to the backend.
pub struct StateDb {
    backend: Arc<dyn StateBackend>,
    root: H256,
    /// Accounts committed under `root`
    committed: HashMap<Address, AccountRecord>,
    objects: HashMap<Address, StateObject>,
    /// Accounts modified since the last commit
    dirty: HashSet<Address>,
    logs: Vec<Log>,
    tx_hash: H256,
    tx_index: usize,
    /// First backend failure seen by an infallible getter
    db_error: Option<String>,
}

impl StateDb {
    /// Open the state committed under `root`. The zero root is the empty state.
    pub fn new(root: H256, backend: Arc<dyn StateBackend>) -> ContractResult<Self> {
        let committed = if root.is_zero() {
            HashMap::new()
        } else {
            backend
                .load_accounts(&root)?
                .ok_or_else(|| ContractError::StateError(format!("missing state root {:?}", root)))?
                .into_iter()
                .collect()
        };

        tracing::debug!(?root, accounts = committed.len(), "opened state");

        Ok(Self {
            backend,
            root,
            committed,
            objects: HashMap::new(),
            dirty: HashSet::new(),
            logs: Vec::new(),
            tx_hash: H256::zero(),
            tx_index: 0,
            db_error: None,
        })
    }

    /// Root the state was opened at or last committed to
    pub fn root(&self) -> H256 {
        self.root
    }

    pub fn backend(&self) -> Arc<dyn StateBackend> {
        self.backend.clone()
    }

    /// First backend error hit while reading, if any
    pub fn error(&self) -> Option<&str> {
        self.db_error.as_deref()
    }

    fn record_error(&mut self, err: ContractError) {
        tracing::error!(error = %err, "state backend read failed");
        if self.db_error.is_none() {
            self.db_error = Some(err.to_string());
        }
    }

    fn account(&self, address: &Address) -> Option<&AccountRecord> {
        match self.objects.get(address) {
            Some(obj) if obj.deleted => None,
            Some(obj) => Some(&obj.account),
            None => self.committed.get(address),
        }
    }

    fn state_object(&mut self, address: &Address) -> Option<&mut StateObject> {
        if !self.objects.contains_key(address) {
            let record = self.committed.get(address)?.clone();
            self.objects
                .insert(*address, StateObject::from_record(record));
        }
        self.objects.get_mut(address).filter(|obj| !obj.deleted)
    }

    fn get_or_new_state_object(&mut self, address: &Address) -> &mut StateObject {
        self.dirty.insert(*address);
        if self.state_object(address).is_none() {
            self.objects.insert(*address, StateObject::fresh());
        }
        self.objects
            .entry(*address)
            .or_insert_with(StateObject::fresh)
    }

    /// Create a new account, keeping the balance of any live account it replaces
    pub fn create_account(&mut self, address: &Address) {
        let mut obj = StateObject::fresh();
        obj.account.balance = self.get_balance(address);
        self.objects.insert(*address, obj);
        self.dirty.insert(*address);
    }

    /// Drop the account and its storage at the next commit
    pub fn delete_account(&mut self, address: &Address) {
        if let Some(obj) = self.state_object(address) {
            obj.deleted = true;
            self.dirty.insert(*address);
        }
    }

    pub fn exist(&self, address: &Address) -> bool {
        self.account(address).is_some()
    }

    /// Whether the account is missing or empty (EIP-161)
    pub fn empty(&self, address: &Address) -> bool {
        self.account(address).map_or(true, AccountRecord::is_empty)
    }

    pub fn get_balance(&self, address: &Address) -> U256 {
        self.account(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    /// Credit `amount`; a zero amount still creates (touches) the account
    pub fn add_balance(&mut self, address: &Address, amount: U256) {
        let obj = self.get_or_new_state_object(address);
        obj.account.balance = obj.account.balance.saturating_add(amount);
    }

    pub fn sub_balance(&mut self, address: &Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let obj = self.get_or_new_state_object(address);
        obj.account.balance = obj.account.balance.saturating_sub(amount);
    }

    pub fn set_balance(&mut self, address: &Address, amount: U256) {
        self.get_or_new_state_object(address).account.balance = amount;
    }

    pub fn get_nonce(&self, address: &Address) -> Nonce {
        self.account(address).map(|account| account.nonce).unwrap_or(0)
    }

    pub fn set_nonce(&mut self, address: &Address, nonce: Nonce) {
        self.get_or_new_state_object(address).account.nonce = nonce;
    }

    pub fn get_code(&mut self, address: &Address) -> Arc<Vec<u8>> {
        let backend = self.backend.clone();
        let obj = match self.state_object(address) {
            Some(obj) => obj,
            None => return Arc::new(Vec::new()),
        };
        if let Some(code) = &obj.code {
            return code.clone();
        }
        if obj.account.code_hash == KECCAK_EMPTY {
            let code = Arc::new(Vec::new());
            obj.code = Some(code.clone());
            return code;
        }

        let code_hash = obj.account.code_hash;
        match backend.load_code(&code_hash) {
            Ok(Some(code)) => {
                let code = Arc::new(code);
                obj.code = Some(code.clone());
                code
            }
            Ok(None) => {
                self.record_error(ContractError::StateError(format!(
                    "missing code {:?}",
                    code_hash
                )));
                Arc::new(Vec::new())
            }
            Err(err) => {
                self.record_error(err);
                Arc::new(Vec::new())
            }
        }
    }

    pub fn get_code_size(&mut self, address: &Address) -> usize {
        self.get_code(address).len()
    }

    /// Code hash, or zero for an account that does not exist
    pub fn get_code_hash(&self, address: &Address) -> H256 {
        self.account(address)
            .map(|account| account.code_hash)
            .unwrap_or_default()
    }

    pub fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        let code_hash = keccak256(&code);
        let obj = self.get_or_new_state_object(address);
        obj.code = Some(Arc::new(code));
        obj.account.code_hash = code_hash;
        obj.dirty_code = true;
    }

    /// Code stored under `code_hash`, from a live account or the backend
    pub fn code_by_hash(&self, code_hash: &H256) -> ContractResult<Vec<u8>> {
        if *code_hash == KECCAK_EMPTY {
            return Ok(Vec::new());
        }
        let live = self
            .objects
            .values()
            .filter(|obj| obj.account.code_hash == *code_hash)
            .find_map(|obj| obj.code.as_ref());
        if let Some(code) = live {
            return Ok(code.as_ref().clone());
        }
        self.backend
            .load_code(code_hash)?
            .ok_or_else(|| ContractError::StateError(format!("missing code {:?}", code_hash)))
    }

    fn ensure_storage(&mut self, address: &Address) {
        let backend = self.backend.clone();
        let obj = match self.state_object(address) {
            Some(obj) if !obj.storage_loaded => obj,
            _ => return,
        };
        obj.storage_loaded = true;
        let storage_root = obj.account.storage_root;
        if storage_root.is_zero() {
            return;
        }

        match backend.load_storage(&storage_root) {
            Ok(Some(entries)) => {
                if let Some(obj) = self.objects.get_mut(address) {
                    obj.storage = entries.into_iter().collect();
                }
            }
            Ok(None) => self.record_error(ContractError::StateError(format!(
                "missing storage {:?}",
                storage_root
            ))),
            Err(err) => self.record_error(err),
        }
    }

    /// Current value of a storage slot, zero when unset
    pub fn get_state(&mut self, address: &Address, key: &H256) -> H256 {
        self.ensure_storage(address);
        self.state_object(address)
            .and_then(|obj| obj.storage.get(key).copied())
            .unwrap_or_default()
    }

    /// Write a slot; writing zero clears it
    pub fn set_state(&mut self, address: &Address, key: H256, value: H256) {
        if self.get_state(address, &key) == value {
            return;
        }
        let obj = self.get_or_new_state_object(address);
        if value.is_zero() {
            obj.storage.remove(&key);
        } else {
            obj.storage.insert(key, value);
        }
        obj.storage_changed = true;
    }

    /// Visit the account's non-zero storage in ascending key order until `cb` returns false
    pub fn for_each_storage<F>(&mut self, address: &Address, mut cb: F)
    where
        F: FnMut(&H256, &H256) -> bool,
    {
        self.ensure_storage(address);
        let obj = match self.state_object(address) {
            Some(obj) => obj,
            None => return,
        };
        for (key, value) in &obj.storage {
            if !cb(key, value) {
                break;
            }
        }
    }

    /// Set the transaction the following logs belong to
    pub fn prepare(&mut self, tx_hash: H256, tx_index: usize) {
        self.tx_hash = tx_hash;
        self.tx_index = tx_index;
    }

    pub fn add_log(&mut self, mut log: Log) {
        log.tx_hash = self.tx_hash;
        log.tx_index = self.tx_index;
        log.index = self.logs.len();
        self.logs.push(log);
    }

    /// All logs emitted since the state was opened
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// Logs emitted by one transaction
    pub fn tx_logs(&self, tx_hash: &H256) -> Vec<Log> {
        self.logs
            .iter()
            .filter(|log| log.tx_hash == *tx_hash)
            .cloned()
            .collect()
    }

    /// With `delete_empty`, mark every touched account that ended up empty
    /// (EIP-161) for deletion at the next commit
    pub fn finalise(&mut self, delete_empty: bool) {
        if !delete_empty {
            return;
        }
        for address in &self.dirty {
            if let Some(obj) = self.objects.get_mut(address) {
                if !obj.deleted && obj.is_empty() {
                    obj.deleted = true;
                }
            }
        }
    }

    fn build_commit(&mut self) -> StateCommit {
        let mut accounts: BTreeMap<Address, AccountRecord> =
            self.committed.iter().map(|(a, r)| (*a, r.clone())).collect();
        let mut storage = Vec::new();
        let mut code = Vec::new();

        let mut dirty: Vec<Address> = self.dirty.iter().copied().collect();
        dirty.sort();
        for address in dirty {
            let obj = match self.objects.get_mut(&address) {
                Some(obj) => obj,
                None => continue,
            };
            if obj.deleted {
                accounts.remove(&address);
                continue;
            }
            if obj.storage_changed {
                let entries: Vec<(H256, H256)> =
                    obj.storage.iter().map(|(k, v)| (*k, *v)).collect();
                let leaves: Vec<Vec<u8>> = entries.iter().map(|(k, v)| storage_leaf(k, v)).collect();
                obj.account.storage_root = MerkleTree::root_of(&leaves);
                if !entries.is_empty() {
                    storage.push((obj.account.storage_root, entries));
                }
            }
            if obj.dirty_code {
                if let Some(bytes) = &obj.code {
                    if !bytes.is_empty() {
                        code.push((obj.account.code_hash, bytes.as_ref().clone()));
                    }
                }
            }
            accounts.insert(address, obj.account.clone());
        }

        let accounts: Vec<(Address, AccountRecord)> = accounts.into_iter().collect();
        let leaves: Vec<Vec<u8>> = accounts.iter().map(|(a, r)| account_leaf(a, r)).collect();
        StateCommit {
            root: MerkleTree::root_of(&leaves),
            accounts,
            storage,
            code,
        }
    }

    /// Root the state would commit to right now
    pub fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        self.finalise(delete_empty);
        self.build_commit().root
    }

    /// Write the state to the backend and return the new root
    pub fn commit(&mut self, delete_empty: bool) -> ContractResult<H256> {
        if let Some(err) = &self.db_error {
            return Err(ContractError::StateError(err.clone()));
        }
        self.finalise(delete_empty);
        let commit = self.build_commit();
        self.backend.write(&commit)?;

        self.committed = commit.accounts.iter().cloned().collect();
        self.objects.retain(|_, obj| !obj.deleted);
        for obj in self.objects.values_mut() {
            obj.dirty_code = false;
            obj.storage_changed = false;
        }
        self.dirty.clear();
        self.root = commit.root;

        tracing::info!(
            root = ?commit.root,
            accounts = commit.accounts.len(),
            storage_sets = commit.storage.len(),
            code = commit.code.len(),
            "state committed"
        );
        Ok(commit.root)
    }

    /// Proof that `key` holds its current value under the storage root the account would commit to
    pub fn storage_proof(&mut self, address: &Address, key: &H256) -> Option<(H256, MerkleProof)> {
        self.ensure_storage(address);
        let obj = self.state_object(address)?;
        let index = obj.storage.keys().position(|k| k == key)?;
        let leaves: Vec<Vec<u8>> = obj.storage.iter().map(|(k, v)| storage_leaf(k, v)).collect();
        let tree = MerkleTree::new(&leaves).ok()?;
        let proof = tree.proof(index).ok()?;
        Some((tree.root(), proof))
    }

    /// Proof of the account's record under the committed state root
    pub fn account_proof(&self, address: &Address) -> Option<MerkleProof> {
        let mut accounts: Vec<(&Address, &AccountRecord)> = self.committed.iter().collect();
        accounts.sort_by_key(|(a, _)| **a);
        let index = accounts.iter().position(|(a, _)| *a == address)?;
        let leaves: Vec<Vec<u8>> = accounts.iter().map(|(a, r)| account_leaf(a, r)).collect();
        MerkleTree::new(&leaves).ok()?.proof(index).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn new_state() -> StateDb {
        StateDb::new(H256::zero(), Arc::new(MemoryBackend::new())).unwrap()
    }

    #[test]
    fn test_balance_and_nonce() {
        let mut state = new_state();
        let a = addr(1);

        assert!(!state.exist(&a));
        state.add_balance(&a, U256::from(100));
        state.sub_balance(&a, U256::from(30));
        state.set_nonce(&a, 5);

        assert!(state.exist(&a));
        assert_eq!(state.get_balance(&a), U256::from(70));
        assert_eq!(state.get_nonce(&a), 5);
    }

    #[test]
    fn test_create_account_keeps_balance() {
        let mut state = new_state();
        let a = addr(1);
        state.add_balance(&a, U256::from(7));
        state.set_state(&a, H256::zero(), H256::repeat_byte(9));

        state.create_account(&a);
        assert_eq!(state.get_balance(&a), U256::from(7));
        assert_eq!(state.get_state(&a, &H256::zero()), H256::zero());
    }

    #[test]
    fn test_commit_and_reopen() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new());
        let mut state = StateDb::new(H256::zero(), backend.clone()).unwrap();
        let a = addr(1);
        state.add_balance(&a, U256::from(1000));
        state.set_code(&a, vec![0x60, 0x00]);
        state.set_state(&a, H256::from_low_u64_be(1), H256::from_low_u64_be(42));
        state.set_state(&a, H256::from_low_u64_be(2), H256::from_low_u64_be(43));

        let root = state.commit(true).unwrap();
        assert_ne!(root, H256::zero());
        assert_eq!(state.intermediate_root(true), root);

        let mut reopened = StateDb::new(root, backend).unwrap();
        assert_eq!(reopened.get_balance(&a), U256::from(1000));
        assert_eq!(*reopened.get_code(&a), vec![0x60, 0x00]);
        assert_eq!(
            reopened.get_state(&a, &H256::from_low_u64_be(2)),
            H256::from_low_u64_be(43)
        );
        assert_eq!(
            reopened.code_by_hash(&keccak256(&[0x60, 0x00])).unwrap(),
            vec![0x60, 0x00]
        );
    }

    #[test]
    fn test_commit_is_deterministic() {
        let build = || {
            let mut state = new_state();
            state.add_balance(&addr(2), U256::from(1));
            state.add_balance(&addr(1), U256::from(2));
            state.set_state(&addr(1), H256::repeat_byte(3), H256::repeat_byte(4));
            state.commit(true).unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_missing_root() {
        let result = StateDb::new(H256::repeat_byte(1), Arc::new(MemoryBackend::new()));
        assert!(matches!(result, Err(ContractError::StateError(_))));
    }

    #[test]
    fn test_for_each_storage_order_and_stop() {
        let mut state = new_state();
        let a = addr(1);
        for i in [3u64, 1, 2] {
            state.set_state(&a, H256::from_low_u64_be(i), H256::from_low_u64_be(i * 10));
        }
        state.set_state(&a, H256::from_low_u64_be(4), H256::zero());

        let mut seen = Vec::new();
        state.for_each_storage(&a, |k, v| {
            seen.push((k.to_low_u64_be(), v.to_low_u64_be()));
            true
        });
        assert_eq!(seen, vec![(1, 10), (2, 20), (3, 30)]);

        let mut count = 0;
        state.for_each_storage(&a, |_, _| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_zero_write_clears_slot() {
        let mut state = new_state();
        let a = addr(1);
        state.add_balance(&a, U256::one());
        state.set_state(&a, H256::zero(), H256::repeat_byte(1));
        let root = state.commit(true).unwrap();

        state.set_state(&a, H256::zero(), H256::zero());
        assert_eq!(state.get_state(&a, &H256::zero()), H256::zero());
        assert_ne!(state.commit(true).unwrap(), root);

        let mut seen = 0;
        state.for_each_storage(&a, |_, _| {
            seen += 1;
            true
        });
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_delete_empty_and_delete_account() {
        let mut state = new_state();
        let empty = addr(1);
        let doomed = addr(2);
        state.add_balance(&empty, U256::zero());
        state.add_balance(&doomed, U256::from(5));
        assert!(state.exist(&empty));
        state.commit(true).unwrap();

        assert!(!state.exist(&empty));
        state.delete_account(&doomed);
        assert!(!state.exist(&doomed));
        assert_eq!(state.get_balance(&doomed), U256::zero());

        let root = state.commit(true).unwrap();
        assert_eq!(root, H256::zero());
    }

    #[test]
    fn test_storage_only_account_is_empty() {
        // nonce, balance and code decide emptiness; storage does not
        let mut state = new_state();
        let a = addr(1);
        state.set_state(&a, H256::from_low_u64_be(1), H256::from_low_u64_be(1));

        let kept = state.commit(false).unwrap();
        assert_ne!(kept, H256::zero());
        assert!(state.exist(&a));

        state.set_state(&a, H256::from_low_u64_be(2), H256::from_low_u64_be(2));
        assert_eq!(state.commit(true).unwrap(), H256::zero());
        assert!(!state.exist(&a));
    }

    #[test]
    fn test_storage_proof() {
        let mut state = new_state();
        let a = addr(1);
        let key = H256::from_low_u64_be(7);
        state.set_nonce(&a, 1);
        state.set_state(&a, key, H256::from_low_u64_be(70));
        state.set_state(&a, H256::from_low_u64_be(8), H256::from_low_u64_be(80));
        state.commit(true).unwrap();

        let (root, proof) = state.storage_proof(&a, &key).unwrap();
        assert!(proof.verify(root, &storage_leaf(&key, &H256::from_low_u64_be(70))));
        assert!(state.storage_proof(&a, &H256::from_low_u64_be(9)).is_none());

        let account_proof = state.account_proof(&a).unwrap();
        let record = AccountRecord {
            nonce: 1,
            storage_root: root,
            ..Default::default()
        };
        assert!(account_proof.verify(state.root(), &account_leaf(&a, &record)));
    }

    #[test]
    fn test_logs_carry_tx_position() {
        let mut state = new_state();
        let tx = H256::repeat_byte(0xaa);
        state.prepare(tx, 3);
        state.add_log(Log::new(addr(1), vec![], vec![1], 10));
        state.add_log(Log::new(addr(1), vec![], vec![2], 10));

        let logs = state.tx_logs(&tx);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].index, 1);
        assert_eq!(logs[0].tx_index, 3);
    }
}

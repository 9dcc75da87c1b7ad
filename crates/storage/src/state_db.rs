// storage/src/state_db.rs

use crate::cache::NodeCache;
use crate::db::{ColumnFamily, Database};
use crate::{StorageError, StorageResult};
use ethers_core::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use smart_contracts::{AccountRecord, ContractResult, StateBackend, StateCommit};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// On-disk form of an account entry
#[derive(Debug, Serialize, Deserialize)]
struct StoredAccount {
    address: [u8; 20],
    nonce: u64,
    balance: [u8; 32],
    code_hash: [u8; 32],
    storage_root: [u8; 32],
}

impl StoredAccount {
    fn new(address: &Address, account: &AccountRecord) -> Self {
        let mut balance = [0u8; 32];
        account.balance.to_big_endian(&mut balance);
        Self {
            address: address.0,
            nonce: account.nonce,
            balance,
            code_hash: account.code_hash.0,
            storage_root: account.storage_root.0,
        }
    }

    fn into_record(self) -> (Address, AccountRecord) {
        (
            Address::from(self.address),
            AccountRecord {
                nonce: self.nonce,
                balance: U256::from_big_endian(&self.balance),
                code_hash: H256::from(self.code_hash),
                storage_root: H256::from(self.storage_root),
            },
        )
    }
}

fn encode_accounts(accounts: &[(Address, AccountRecord)]) -> StorageResult<Vec<u8>> {
    let stored: Vec<StoredAccount> = accounts
        .iter()
        .map(|(address, account)| StoredAccount::new(address, account))
        .collect();
    Ok(bincode::serialize(&stored)?)
}

fn decode_accounts(bytes: &[u8]) -> StorageResult<Vec<(Address, AccountRecord)>> {
    let stored: Vec<StoredAccount> = bincode::deserialize(bytes)?;
    Ok(stored.into_iter().map(StoredAccount::into_record).collect())
}

fn encode_storage(entries: &[(H256, H256)]) -> StorageResult<Vec<u8>> {
    let stored: Vec<([u8; 32], [u8; 32])> = entries.iter().map(|(k, v)| (k.0, v.0)).collect();
    Ok(bincode::serialize(&stored)?)
}

fn decode_storage(bytes: &[u8]) -> StorageResult<Vec<(H256, H256)>> {
    let stored: Vec<([u8; 32], [u8; 32])> = bincode::deserialize(bytes)?;
    Ok(stored
        .into_iter()
        .map(|(k, v)| (H256::from(k), H256::from(v)))
        .collect())
}

/// Committed nodes not yet written to disk
#[derive(Default)]
struct DirtyNodes {
    nodes: HashMap<(ColumnFamily, H256), Arc<Vec<u8>>>,
}

/// Content-addressed state database over RocksDB.
///
/// Commits from the state view land in memory. `flush` writes them to disk
/// in one batch together with the new head root.
pub struct StateDatabase {
    db: Database,
    dirty: RwLock<DirtyNodes>,
    cache: NodeCache,
}

impl StateDatabase {
    pub fn new(db: Database) -> Self {
        let cache = NodeCache::new(db.config().cache_size);
        Self {
            db,
            dirty: RwLock::new(DirtyNodes::default()),
            cache,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    /// Root of the last flushed state
    pub fn head_root(&self) -> StorageResult<Option<H256>> {
        self.db.head_root()
    }

    /// Number of nodes waiting for `flush`
    pub fn pending(&self) -> usize {
        self.dirty.read().map(|dirty| dirty.nodes.len()).unwrap_or(0)
    }

    /// Write every committed node to disk and record `root` as the head
    pub fn flush(&self, root: H256) -> StorageResult<usize> {
        let mut dirty = self
            .dirty
            .write()
            .map_err(|_| StorageError::CacheError("dirty set lock poisoned".into()))?;

        let mut entries: Vec<(ColumnFamily, Vec<u8>, Vec<u8>)> = dirty
            .nodes
            .iter()
            .map(|((cf, key), node)| (*cf, key.as_bytes().to_vec(), node.as_ref().clone()))
            .collect();
        let count = entries.len();
        entries.push(Database::head_root_entry(&root));
        self.db.write(&entries)?;

        for ((cf, key), node) in dirty.nodes.drain() {
            self.cache.insert(cf, key, node)?;
        }
        tracing::info!(root = %hex::encode(root.as_bytes()), nodes = count, "flushed state nodes");
        Ok(count)
    }

    /// Release the store; nodes not yet flushed are dropped
    pub fn close(self) -> StorageResult<()> {
        let pending = self.pending();
        if pending > 0 {
            tracing::warn!(pending, "closing state database with unflushed nodes");
        }
        self.db.close()
    }

    fn node(&self, cf: ColumnFamily, key: &H256) -> StorageResult<Option<Arc<Vec<u8>>>> {
        if let Some(node) = self
            .dirty
            .read()
            .map_err(|_| StorageError::CacheError("dirty set lock poisoned".into()))?
            .nodes
            .get(&(cf, *key))
        {
            return Ok(Some(node.clone()));
        }
        if let Some(node) = self.cache.get(cf, key)? {
            return Ok(Some(node));
        }
        match self.db.get(cf, key.as_bytes())? {
            Some(bytes) => {
                let node = Arc::new(bytes);
                self.cache.insert(cf, *key, node.clone())?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    fn stage(&self, dirty: &mut DirtyNodes, cf: ColumnFamily, key: H256, bytes: Vec<u8>) {
        dirty.nodes.insert((cf, key), Arc::new(bytes));
    }
}

impl StateBackend for StateDatabase {
    fn load_accounts(&self, root: &H256) -> ContractResult<Option<Vec<(Address, AccountRecord)>>> {
        match self.node(ColumnFamily::StateNodes, root)? {
            Some(bytes) => Ok(Some(decode_accounts(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_storage(&self, storage_root: &H256) -> ContractResult<Option<Vec<(H256, H256)>>> {
        match self.node(ColumnFamily::StorageNodes, storage_root)? {
            Some(bytes) => Ok(Some(decode_storage(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_code(&self, code_hash: &H256) -> ContractResult<Option<Vec<u8>>> {
        Ok(self
            .node(ColumnFamily::Code, code_hash)?
            .map(|code| code.as_ref().clone()))
    }

    fn write(&self, commit: &StateCommit) -> ContractResult<()> {
        let accounts = encode_accounts(&commit.accounts)?;
        let storage = commit
            .storage
            .iter()
            .map(|(root, entries)| -> StorageResult<(H256, Vec<u8>)> { Ok((*root, encode_storage(entries)?)) })
            .collect::<StorageResult<Vec<_>>>()?;

        let mut dirty = self
            .dirty
            .write()
            .map_err(|_| StorageError::CacheError("dirty set lock poisoned".into()))?;
        self.stage(&mut dirty, ColumnFamily::StateNodes, commit.root, accounts);
        for (root, bytes) in storage {
            self.stage(&mut dirty, ColumnFamily::StorageNodes, root, bytes);
        }
        for (hash, code) in &commit.code {
            self.stage(&mut dirty, ColumnFamily::Code, *hash, code.clone());
        }

        tracing::debug!(
            root = %hex::encode(commit.root.as_bytes()),
            accounts = commit.accounts.len(),
            storage_sets = commit.storage.len(),
            code = commit.code.len(),
            "staged commit"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseConfig;
    use smart_contracts::StateDb;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Arc<StateDatabase> {
        Arc::new(StateDatabase::new(Database::open(DatabaseConfig::at(dir.path())).unwrap()))
    }

    #[test]
    fn test_account_encoding() {
        let accounts = vec![(
            Address::repeat_byte(1),
            AccountRecord {
                nonce: 3,
                balance: U256::from(1_000_000u64),
                code_hash: H256::repeat_byte(2),
                storage_root: H256::repeat_byte(3),
            },
        )];
        let decoded = decode_accounts(&encode_accounts(&accounts).unwrap()).unwrap();
        assert_eq!(decoded, accounts);
        assert!(decode_accounts(&[0xff]).is_err());
    }

    #[test]
    fn test_reads_see_unflushed_commits() {
        let dir = TempDir::new().unwrap();
        let backend = open(&dir);
        let root = H256::repeat_byte(9);

        backend
            .write(&StateCommit {
                root,
                accounts: vec![(Address::zero(), AccountRecord::default())],
                storage: vec![],
                code: vec![(H256::repeat_byte(4), vec![0x60, 0x00])],
            })
            .unwrap();

        assert_eq!(backend.pending(), 2);
        assert!(backend.load_accounts(&root).unwrap().is_some());
        assert_eq!(backend.load_code(&H256::repeat_byte(4)).unwrap(), Some(vec![0x60, 0x00]));
        // nothing on disk yet
        assert_eq!(backend.head_root().unwrap(), None);
        assert_eq!(backend.database().get(ColumnFamily::Code, H256::repeat_byte(4).as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_state_survives_flush_and_reopen() {
        let dir = TempDir::new().unwrap();
        let owner = Address::repeat_byte(0xaa);
        let contract = Address::repeat_byte(0xcc);

        let root = {
            let backend = open(&dir);
            let mut state = StateDb::new(H256::zero(), backend.clone()).unwrap();
            state.add_balance(&owner, U256::from(500));
            state.set_code(&contract, vec![0x60, 0x01, 0x00]);
            state.set_state(&contract, H256::from_low_u64_be(1), H256::from_low_u64_be(42));
            let root = state.commit(true).unwrap();
            drop(state);

            assert_eq!(backend.flush(root).unwrap(), 3);
            assert_eq!(backend.pending(), 0);
            Arc::try_unwrap(backend).ok().unwrap().close().unwrap();
            root
        };

        let backend = open(&dir);
        assert_eq!(backend.head_root().unwrap(), Some(root));

        let mut state = StateDb::new(root, backend.clone()).unwrap();
        assert_eq!(state.get_balance(&owner), U256::from(500));
        assert_eq!(state.get_code(&contract).as_slice(), &[0x60, 0x01, 0x00]);
        assert_eq!(
            state.get_state(&contract, &H256::from_low_u64_be(1)),
            H256::from_low_u64_be(42)
        );
        assert_eq!(state.intermediate_root(true), root);
        // the second read of the account set comes from the cache
        let _ = StateDb::new(root, backend.clone()).unwrap();
        assert!(backend.cache().stats().0 >= 1);
    }

    #[test]
    fn test_unknown_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let backend = open(&dir);
        assert!(StateDb::new(H256::repeat_byte(1), backend).is_err());
    }
}

// smart-contracts/src/backend.rs

use crate::ContractResult;
use ethers_core::types::{Address, H256, U256};
use evm_core::Nonce;
use evm_crypto::KECCAK_EMPTY;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Committed form of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub nonce: Nonce,
    pub balance: U256,
    /// Keccak of the code, `KECCAK_EMPTY` without code
    pub code_hash: H256,
    /// Root over the non-zero storage slots, zero when there are none
    pub storage_root: H256,
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            code_hash: KECCAK_EMPTY,
            storage_root: H256::zero(),
        }
    }
}

impl AccountRecord {
    /// Nonce zero, no balance and no code
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == KECCAK_EMPTY
    }
}

/// Everything one commit adds to the backend, keyed by content hash
#[derive(Debug, Clone, Default)]
pub struct StateCommit {
    /// New state root
    pub root: H256,
    /// Full account set under `root`, sorted by address
    pub accounts: Vec<(Address, AccountRecord)>,
    /// Storage sets by storage root, each sorted by key
    pub storage: Vec<(H256, Vec<(H256, H256)>)>,
    /// Code by code hash
    pub code: Vec<(H256, Vec<u8>)>,
}

/// Content-addressed source of committed state
pub trait StateBackend: Send + Sync {
    /// Account set committed under `root`
    fn load_accounts(&self, root: &H256) -> ContractResult<Option<Vec<(Address, AccountRecord)>>>;

    /// Storage entries committed under `storage_root`
    fn load_storage(&self, storage_root: &H256) -> ContractResult<Option<Vec<(H256, H256)>>>;

    /// Code stored under `code_hash`
    fn load_code(&self, code_hash: &H256) -> ContractResult<Option<Vec<u8>>>;

    /// Record the output of a commit
    fn write(&self, commit: &StateCommit) -> ContractResult<()>;
}

/// Merkle leaf of an account: address, nonce, balance, code hash, storage root
pub fn account_leaf(address: &Address, account: &AccountRecord) -> Vec<u8> {
    let mut leaf = Vec::with_capacity(20 + 8 + 32 + 32 + 32);
    leaf.extend_from_slice(address.as_bytes());
    leaf.extend_from_slice(&account.nonce.to_be_bytes());
    let mut balance = [0u8; 32];
    account.balance.to_big_endian(&mut balance);
    leaf.extend_from_slice(&balance);
    leaf.extend_from_slice(account.code_hash.as_bytes());
    leaf.extend_from_slice(account.storage_root.as_bytes());
    leaf
}

/// Merkle leaf of a storage slot: key followed by value
pub fn storage_leaf(key: &H256, value: &H256) -> Vec<u8> {
    let mut leaf = Vec::with_capacity(64);
    leaf.extend_from_slice(key.as_bytes());
    leaf.extend_from_slice(value.as_bytes());
    leaf
}

/// Backend kept entirely in memory, used by tests and throwaway runs
#[derive(Debug, Default)]
pub struct MemoryBackend {
    accounts: RwLock<HashMap<H256, Vec<(Address, AccountRecord)>>>,
    storage: RwLock<HashMap<H256, Vec<(H256, H256)>>>,
    code: RwLock<HashMap<H256, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> crate::ContractError {
    crate::ContractError::StateError("backend lock poisoned".to_string())
}

impl StateBackend for MemoryBackend {
    fn load_accounts(&self, root: &H256) -> ContractResult<Option<Vec<(Address, AccountRecord)>>> {
        Ok(self.accounts.read().map_err(poisoned)?.get(root).cloned())
    }

    fn load_storage(&self, storage_root: &H256) -> ContractResult<Option<Vec<(H256, H256)>>> {
        Ok(self.storage.read().map_err(poisoned)?.get(storage_root).cloned())
    }

    fn load_code(&self, code_hash: &H256) -> ContractResult<Option<Vec<u8>>> {
        Ok(self.code.read().map_err(poisoned)?.get(code_hash).cloned())
    }

    fn write(&self, commit: &StateCommit) -> ContractResult<()> {
        self.accounts
            .write()
            .map_err(poisoned)?
            .insert(commit.root, commit.accounts.clone());

        let mut storage = self.storage.write().map_err(poisoned)?;
        for (root, entries) in &commit.storage {
            storage.insert(*root, entries.clone());
        }

        let mut code = self.code.write().map_err(poisoned)?;
        for (hash, bytes) in &commit.code {
            code.insert(*hash, bytes.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_leaf_layout() {
        let address = Address::repeat_byte(0x11);
        let account = AccountRecord {
            nonce: 1,
            balance: U256::from(2),
            ..Default::default()
        };
        let leaf = account_leaf(&address, &account);

        assert_eq!(leaf.len(), 124);
        assert_eq!(&leaf[..20], address.as_bytes());
        assert_eq!(leaf[27], 1);
        assert_eq!(leaf[59], 2);
        assert_eq!(&leaf[60..92], KECCAK_EMPTY.as_bytes());
    }

    #[test]
    fn test_memory_backend() {
        let backend = MemoryBackend::new();
        let root = H256::repeat_byte(1);
        let commit = StateCommit {
            root,
            accounts: vec![(Address::zero(), AccountRecord::default())],
            storage: vec![(H256::repeat_byte(2), vec![(H256::zero(), H256::repeat_byte(3))])],
            code: vec![(H256::repeat_byte(4), vec![0x00])],
        };
        backend.write(&commit).unwrap();

        assert_eq!(backend.load_accounts(&root).unwrap().unwrap().len(), 1);
        assert!(backend.load_accounts(&H256::zero()).unwrap().is_none());
        assert_eq!(
            backend.load_storage(&H256::repeat_byte(2)).unwrap().unwrap()[0].1,
            H256::repeat_byte(3)
        );
        assert_eq!(backend.load_code(&H256::repeat_byte(4)).unwrap(), Some(vec![0x00]));
    }

    #[test]
    fn test_empty_account() {
        assert!(AccountRecord::default().is_empty());
        let funded = AccountRecord {
            balance: U256::one(),
            ..Default::default()
        };
        assert!(!funded.is_empty());
    }
}

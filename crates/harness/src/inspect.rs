// harness/src/inspect.rs

use crate::{HarnessError, HarnessResult};
use ethers_core::types::{Address, H256, U256};
use evm_core::Nonce;
use smart_contracts::StateDb;
use std::fmt;
use std::sync::Arc;
use storage::{Database, DatabaseConfig, StateDatabase};

/// One account as read back from a persisted state
#[derive(Debug, Clone)]
pub struct Inspection {
    pub root: H256,
    pub address: Address,
    pub balance: U256,
    pub nonce: Nonce,
    pub code_hash: H256,
    pub code_len: usize,
    pub storage: Vec<(H256, H256)>,
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "root      {:?}", self.root)?;
        writeln!(f, "address   {:?}", self.address)?;
        writeln!(f, "balance   {}", self.balance)?;
        writeln!(f, "nonce     {}", self.nonce)?;
        writeln!(f, "code      {} bytes, hash {:?}", self.code_len, self.code_hash)?;
        for (key, value) in &self.storage {
            writeln!(f, "key={:x},value={:x}", key, value)?;
        }
        Ok(())
    }
}

/// Open the store, load the state at `root` (the head root when omitted) and read one account
pub fn inspect(config: &DatabaseConfig, root: Option<H256>, address: Address) -> HarnessResult<Inspection> {
    let backend = Arc::new(StateDatabase::new(Database::open(config.clone())?));

    let root = match root {
        Some(root) => root,
        None => backend.head_root()?.ok_or(HarnessError::MissingHeadRoot)?,
    };

    let inspection = {
        let mut state = StateDb::new(root, backend.clone())?;
        let code_len = state.get_code(&address).len();
        let mut storage = Vec::new();
        state.for_each_storage(&address, |key, value| {
            storage.push((*key, *value));
            true
        });
        Inspection {
            root,
            address,
            balance: state.get_balance(&address),
            nonce: state.get_nonce(&address),
            code_hash: state.get_code_hash(&address),
            code_len,
            storage,
        }
    };

    let backend = Arc::try_unwrap(backend).map_err(|_| HarnessError::StoreInUse)?;
    backend.close()?;
    Ok(inspection)
}

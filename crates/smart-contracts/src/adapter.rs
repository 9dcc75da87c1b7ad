// smart-contracts/src/adapter.rs

use crate::{state::StateDb, ContractError, ContractResult};
use ethers_core::types::{Address, H256, U256};
use evm_core::BlockContext;
use revm::primitives::{
    Account, AccountInfo, Address as RevmAddress, Bytecode, Bytes, HashMap, B256, KECCAK_EMPTY,
    U256 as RevmU256,
};
use revm::{Database, DatabaseCommit};

pub(crate) fn to_revm_address(address: &Address) -> RevmAddress {
    RevmAddress::from_slice(address.as_bytes())
}

pub(crate) fn from_revm_address(address: &RevmAddress) -> Address {
    Address::from_slice(address.as_slice())
}

pub(crate) fn to_revm_u256(value: U256) -> RevmU256 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    RevmU256::from_be_bytes(bytes)
}

pub(crate) fn from_revm_u256(value: &RevmU256) -> U256 {
    U256::from_big_endian(&value.to_be_bytes::<32>())
}

pub(crate) fn to_revm_hash(hash: &H256) -> B256 {
    B256::from_slice(hash.as_bytes())
}

pub(crate) fn from_revm_hash(hash: &B256) -> H256 {
    H256::from_slice(hash.as_slice())
}

/// Storage word as revm's slot index or value
fn word_to_revm(word: &H256) -> RevmU256 {
    RevmU256::from_be_bytes(word.0)
}

fn revm_to_word(value: &RevmU256) -> H256 {
    H256(value.to_be_bytes::<32>())
}

/// revm's view of a `StateDb` for the length of one transaction.
///
/// Reads go through the state's caches and backend; `commit` folds the
/// transaction's account changes back into the state.
pub(crate) struct StateAdapter<'s> {
    state: &'s mut StateDb,
    block: &'s BlockContext,
}

impl<'s> StateAdapter<'s> {
    pub(crate) fn new(state: &'s mut StateDb, block: &'s BlockContext) -> Self {
        Self { state, block }
    }

    /// Surface a backend failure the state's getters swallowed
    fn checked<T>(&self, value: T) -> ContractResult<T> {
        match self.state.error() {
            Some(err) => Err(ContractError::StateError(err.to_string())),
            None => Ok(value),
        }
    }
}

impl Database for StateAdapter<'_> {
    type Error = ContractError;

    fn basic(&mut self, address: RevmAddress) -> Result<Option<AccountInfo>, Self::Error> {
        let address = from_revm_address(&address);
        if !self.state.exist(&address) {
            return Ok(None);
        }

        let code = self.state.get_code(&address);
        let info = AccountInfo {
            balance: to_revm_u256(self.state.get_balance(&address)),
            nonce: self.state.get_nonce(&address),
            code_hash: to_revm_hash(&self.state.get_code_hash(&address)),
            code: Some(Bytecode::new_raw(Bytes::from(code.as_ref().clone()))),
        };
        self.checked(Some(info))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        let code = self.state.code_by_hash(&from_revm_hash(&code_hash))?;
        Ok(Bytecode::new_raw(Bytes::from(code)))
    }

    fn storage(&mut self, address: RevmAddress, index: RevmU256) -> Result<RevmU256, Self::Error> {
        let value = self
            .state
            .get_state(&from_revm_address(&address), &revm_to_word(&index));
        self.checked(word_to_revm(&value))
    }

    fn block_hash(&mut self, number: RevmU256) -> Result<B256, Self::Error> {
        let number = evm_core::u256_to_u64_saturating(from_revm_u256(&number));
        Ok(to_revm_hash(&self.block.block_hash(number)))
    }
}

impl DatabaseCommit for StateAdapter<'_> {
    fn commit(&mut self, changes: HashMap<RevmAddress, Account>) {
        for (address, account) in changes {
            let address = from_revm_address(&address);
            if account.is_selfdestructed() {
                self.state.delete_account(&address);
                continue;
            }
            if !account.is_touched() {
                continue;
            }

            self.state
                .set_balance(&address, from_revm_u256(&account.info.balance));
            self.state.set_nonce(&address, account.info.nonce);

            let code_hash = from_revm_hash(&account.info.code_hash);
            if account.info.code_hash != KECCAK_EMPTY && code_hash != self.state.get_code_hash(&address) {
                if let Some(code) = &account.info.code {
                    self.state.set_code(&address, code.original_bytes().to_vec());
                }
            }

            for (index, slot) in &account.storage {
                self.state
                    .set_state(&address, revm_to_word(index), revm_to_word(&slot.present_value()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use evm_core::{ChainContext, MockChain};
    use std::sync::Arc;

    fn block() -> BlockContext {
        let chain = MockChain::new(Address::zero()).with_timestamp(1);
        let header = chain.header(&H256::zero(), 100).unwrap();
        BlockContext::new(&header, Arc::new(chain), None).unwrap()
    }

    #[test]
    fn test_word_conversions() {
        let address = Address::repeat_byte(0x5a);
        assert_eq!(from_revm_address(&to_revm_address(&address)), address);

        let value = U256::MAX - U256::from(7);
        assert_eq!(from_revm_u256(&to_revm_u256(value)), value);
        assert_eq!(to_revm_u256(U256::from(42)), RevmU256::from(42u64));

        let word = H256::from_low_u64_be(0x1234);
        assert_eq!(word_to_revm(&word), RevmU256::from(0x1234u64));
        assert_eq!(revm_to_word(&word_to_revm(&word)), word);
    }

    #[test]
    fn test_reads_accounts_and_storage() {
        let mut state = StateDb::new(H256::zero(), Arc::new(MemoryBackend::new())).unwrap();
        let a = Address::repeat_byte(1);
        state.add_balance(&a, U256::from(9));
        state.set_code(&a, vec![0x60, 0x00]);
        state.set_state(&a, H256::from_low_u64_be(1), H256::from_low_u64_be(5));

        let block = block();
        let mut adapter = StateAdapter::new(&mut state, &block);

        let info = adapter.basic(to_revm_address(&a)).unwrap().unwrap();
        assert_eq!(info.balance, RevmU256::from(9u64));
        assert_eq!(from_revm_hash(&info.code_hash), evm_crypto::keccak256(&[0x60, 0x00]));
        assert!(adapter
            .basic(to_revm_address(&Address::repeat_byte(2)))
            .unwrap()
            .is_none());

        let value = adapter
            .storage(to_revm_address(&a), RevmU256::from(1u64))
            .unwrap();
        assert_eq!(value, RevmU256::from(5u64));
        assert_eq!(adapter.code_by_hash(info.code_hash).unwrap().original_bytes().to_vec(), vec![0x60, 0x00]);
    }

    #[test]
    fn test_block_hash_follows_the_chain() {
        let mut state = StateDb::new(H256::zero(), Arc::new(MemoryBackend::new())).unwrap();
        let block = block();
        let mut adapter = StateAdapter::new(&mut state, &block);

        let hash = adapter.block_hash(RevmU256::from(99u64)).unwrap();
        assert_eq!(from_revm_hash(&hash), block.block_hash(99));
        assert_eq!(adapter.block_hash(RevmU256::from(100u64)).unwrap(), B256::ZERO);
    }
}

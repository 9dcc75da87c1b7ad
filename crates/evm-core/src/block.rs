// evm-core/src/block.rs

use crate::types::*;
use ethers_core::types::{Address, H256, U256};
use evm_crypto::hash::Hashable;
use serde::{Deserialize, Serialize};

/// Block header carrying the metadata opcodes read (COINBASE, NUMBER, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of previous block
    pub parent_hash: H256,
    /// Beneficiary of block fees
    pub coinbase: Address,
    /// Block difficulty
    pub difficulty: U256,
    /// Block number/height
    pub number: BlockNumber,
    /// Gas limit for this block
    pub gas_limit: Gas,
    /// Gas used by all transactions
    pub gas_used: Gas,
    /// Block timestamp
    pub timestamp: Timestamp,
    /// Extra data
    pub extra_data: Vec<u8>,
}

impl BlockHeader {
    /// Calculate header hash over a fixed-layout encoding of all fields
    pub fn hash(&self) -> H256 {
        let mut bytes = Vec::with_capacity(32 + 20 + 32 + 8 * 4 + self.extra_data.len());
        bytes.extend_from_slice(self.parent_hash.as_bytes());
        bytes.extend_from_slice(self.coinbase.as_bytes());
        bytes.extend_from_slice(u256_to_h256(self.difficulty).as_bytes());
        bytes.extend_from_slice(&self.number.to_be_bytes());
        bytes.extend_from_slice(&self.gas_limit.to_be_bytes());
        bytes.extend_from_slice(&self.gas_used.to_be_bytes());
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&self.extra_data);
        bytes.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(number: BlockNumber) -> BlockHeader {
        BlockHeader {
            parent_hash: H256::zero(),
            coinbase: Address::zero(),
            difficulty: U256::one(),
            number,
            gas_limit: 1_000_000,
            gas_used: 0,
            timestamp: 1_700_000_000,
            extra_data: vec![],
        }
    }

    #[test]
    fn test_header_hash_is_stable() {
        assert_eq!(header(7).hash(), header(7).hash());
        assert_ne!(header(7).hash(), header(8).hash());
    }
}

// evm-core/src/log.rs

use crate::types::*;
use ethers_core::types::{Address, H256};
use serde::{Deserialize, Serialize};

/// Event log emitted by LOG0..LOG4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Contract address that emitted the log
    pub address: Address,
    /// Topics (indexed parameters)
    pub topics: Vec<H256>,
    /// Data (non-indexed parameters)
    pub data: Vec<u8>,
    /// Block the log was emitted in
    pub block_number: BlockNumber,
    /// Hash of the emitting transaction
    pub tx_hash: H256,
    /// Index of the emitting transaction in its block
    pub tx_index: usize,
    /// Index of the log across the block
    pub index: usize,
}

impl Log {
    pub fn new(address: Address, topics: Vec<H256>, data: Vec<u8>, block_number: BlockNumber) -> Self {
        Self {
            address,
            topics,
            data,
            block_number,
            tx_hash: H256::zero(),
            tx_index: 0,
            index: 0,
        }
    }
}

impl std::fmt::Display for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "log #{} from {:?}", self.index, self.address)?;
        for topic in &self.topics {
            write!(f, "\n  topic: {:?}", topic)?;
        }
        write!(f, "\n  data: 0x{}", hex::encode(&self.data))
    }
}

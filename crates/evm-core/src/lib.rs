// evm-core/src/lib.rs

//! Core data structures shared by the execution engine and the harness
//!
//! This crate provides:
//! - Primitive aliases and 256-bit word conversions
//! - Block header
//! - Chain context (header lookup, consensus engine) and block context
//! - Messages and event logs

pub mod block;
pub mod chain;
pub mod log;
pub mod message;
pub mod types;

pub use block::BlockHeader;
pub use chain::{BlockContext, ChainContext, ConsensusEngine, MockChain};
pub use log::Log;
pub use message::{Message, TxContext};
pub use types::*;

pub use ethers_core::types::{Address, H256, U256};

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Header not found: #{number} ({hash:?})")]
    HeaderNotFound { hash: H256, number: BlockNumber },

    #[error("Cryptographic error: {0}")]
    CryptoError(#[from] evm_crypto::CryptoError),
}

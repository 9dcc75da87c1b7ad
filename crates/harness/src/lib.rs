// harness/src/lib.rs

//! Deploy-and-call harness for the Coin token contract
//!
//! Runs the contract against the execution engine, commits the resulting
//! state into RocksDB, reopens it and checks that code and storage survived.

pub mod config;
pub mod inspect;
pub mod scenario;

pub use config::HarnessConfig;
pub use inspect::{inspect, Inspection};
pub use scenario::{check_minter, verify_round_trip, CoinScenario, GasStep, ScenarioReport};

use ethers_core::types::Address;
use evm_core::CoreError;
use smart_contracts::ContractError;
use storage::StorageError;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that stop a harness run
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("caller {expected:?} is not the minter {got:?}")]
    MinterMismatch { expected: Address, got: Address },

    #[error("code at {0:?} changed across the store round trip")]
    CodeChanged(Address),

    #[error("storage of {0:?} changed across the store round trip")]
    StorageChanged(Address),

    #[error("unexpected output from {method}: {detail}")]
    UnexpectedOutput { method: String, detail: String },

    #[error("no state has been flushed to this store")]
    MissingHeadRoot,

    #[error("state store still has open handles")]
    StoreInUse,

    #[error("Execution error: {0}")]
    Contract(#[from] ContractError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Chain error: {0}")]
    Core(#[from] CoreError),
}

// smart-contracts/src/lib.rs

//! EVM-Compatible Smart Contract Execution
//!
//! This crate provides the execution layer the harness drives:
//! - Contract deployment and execution through revm (`Evm::create`, `Evm::call`)
//! - An account-state view over a pluggable content-addressed backend
//! - Event collection and step tracing
//! - Loading compiled contract artifacts (hex bytecode + ABI)

mod adapter;
pub mod artifact;
pub mod backend;
pub mod state;
pub mod state_transition;
pub mod tracer;
pub mod vm;

pub use artifact::{load_abi, load_bin, ContractArtifact, DecodedEvent};
pub use backend::{AccountRecord, MemoryBackend, StateBackend, StateCommit};
pub use revm::primitives::SpecId;
pub use state::StateDb;
pub use state_transition::{apply_message, ExecutionResult, GasPool};
pub use tracer::{opcode_name, LogConfig, Step, StructLog, StructLogger, Tracer};
pub use vm::{CallOutcome, CreateOutcome, Evm, Execution, VmConfig, MAX_CODE_SIZE};

use revm::primitives::{EVMError, InvalidTransaction};

/// Result type for smart contract operations
pub type ContractResult<T> = Result<T, ContractError>;

/// Errors that can occur during contract execution
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("execution reverted")]
    Revert(Vec<u8>),

    #[error("execution halted: {0}")]
    Halt(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("nonce mismatch: state has {expected}, message has {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("intrinsic gas too low")]
    IntrinsicGas,

    #[error("insufficient funds for gas * price + value")]
    InsufficientFunds,

    #[error("gas limit reached")]
    GasLimitReached,

    #[error("State error: {0}")]
    StateError(String),

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("ABI error: {0}")]
    AbiError(#[from] ethers_core::abi::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ContractError {
    /// Whether the failing frame keeps its unused gas
    pub fn is_revert(&self) -> bool {
        matches!(self, ContractError::Revert(_))
    }
}

impl From<EVMError<ContractError>> for ContractError {
    fn from(err: EVMError<ContractError>) -> Self {
        match err {
            EVMError::Database(err) => err,
            EVMError::Transaction(InvalidTransaction::CallGasCostMoreThanGasLimit { .. }) => {
                ContractError::IntrinsicGas
            }
            EVMError::Transaction(InvalidTransaction::LackOfFundForMaxFee { .. }) => {
                ContractError::InsufficientFunds
            }
            other => ContractError::InvalidTransaction(format!("{:?}", other)),
        }
    }
}

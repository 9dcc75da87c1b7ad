// evm-crypto/src/lib.rs

//! Cryptographic primitives for the EVM harness
//!
//! This crate provides:
//! - Keccak-256 hashing
//! - Keccak binary Merkle tree with inclusion proofs

pub mod hash;
pub mod merkle;

pub use ethers_core::types::{Address, H256};
pub use hash::{keccak256, Hashable, KECCAK_EMPTY};
pub use merkle::{MerkleProof, MerkleTree, ProofStep};

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Merkle tree error: {0}")]
    MerkleError(String),
}

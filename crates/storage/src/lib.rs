// storage/src/lib.rs

//! Persistent Storage Layer
//!
//! This crate provides persistent storage using RocksDB:
//! - Column families for code, account sets, storage sets and metadata
//! - An LRU cache for nodes read back from disk
//! - A content-addressed state database the execution engine commits into

pub mod cache;
pub mod db;
pub mod state_db;

pub use cache::NodeCache;
pub use db::{ColumnFamily, Database, DatabaseConfig, DatabaseStats};
pub use state_db::StateDatabase;

use smart_contracts::ContractError;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Cache error: {0}")]
    CacheError(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<StorageError> for ContractError {
    fn from(err: StorageError) -> Self {
        ContractError::StateError(err.to_string())
    }
}

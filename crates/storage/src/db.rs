// storage/src/db.rs

use crate::{StorageError, StorageResult};
use ethers_core::types::H256;
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

const HEAD_ROOT_KEY: &str = "head_root";

/// Column families for different data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// Contract code by code hash
    Code,
    /// Account sets by state root
    StateNodes,
    /// Storage sets by storage root
    StorageNodes,
    Meta,
}

impl ColumnFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnFamily::Code => "code",
            ColumnFamily::StateNodes => "state_nodes",
            ColumnFamily::StorageNodes => "storage_nodes",
            ColumnFamily::Meta => "meta",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![Self::Code, Self::StateNodes, Self::StorageNodes, Self::Meta]
    }
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub create_if_missing: bool,
    pub max_open_files: i32,
    /// Entries held by the clean node cache
    pub cache_size: usize,
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
            create_if_missing: true,
            max_open_files: 1024,
            cache_size: 4096,
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
            max_write_buffer_number: 3,
        }
    }
}

impl DatabaseConfig {
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..Default::default()
        }
    }
}

/// Main database interface
pub struct Database {
    db: Arc<DB>,
    config: DatabaseConfig,
}

impl Database {
    /// Open or create database
    pub fn open(config: DatabaseConfig) -> StorageResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.increase_parallelism(num_cpus::get() as i32);

        let cfs: Vec<_> = ColumnFamily::all().iter().map(|cf| cf.as_str()).collect();

        let db = DB::open_cf(&opts, &config.path, &cfs)?;

        tracing::info!("Database opened at {}", config.path);

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(cf)?, key)?)
    }

    pub fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        Ok(self.db.put_cf(self.cf(cf)?, key, value)?)
    }

    pub fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        Ok(self.db.delete_cf(self.cf(cf)?, key)?)
    }

    /// Write all `entries` atomically
    pub fn write(&self, entries: &[(ColumnFamily, Vec<u8>, Vec<u8>)]) -> StorageResult<()> {
        let mut batch = WriteBatch::default();
        for (cf, key, value) in entries {
            batch.put_cf(self.cf(*cf)?, key, value);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Number of keys in a column family
    pub fn count(&self, cf: ColumnFamily) -> StorageResult<usize> {
        let mut count = 0;
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    // ==================== METADATA OPERATIONS ====================

    /// Store metadata
    pub fn store_meta(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.put(ColumnFamily::Meta, key.as_bytes(), value)
    }

    /// Get metadata
    pub fn get_meta(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.get(ColumnFamily::Meta, key.as_bytes())
    }

    /// Root of the last flushed state
    pub fn head_root(&self) -> StorageResult<Option<H256>> {
        match self.get_meta(HEAD_ROOT_KEY)? {
            Some(bytes) if bytes.len() == 32 => Ok(Some(H256::from_slice(&bytes))),
            Some(_) => Err(StorageError::Corruption("Invalid head root".into())),
            None => Ok(None),
        }
    }

    pub fn store_head_root(&self, root: &H256) -> StorageResult<()> {
        self.store_meta(HEAD_ROOT_KEY, root.as_bytes())
    }

    pub(crate) fn head_root_entry(root: &H256) -> (ColumnFamily, Vec<u8>, Vec<u8>) {
        (
            ColumnFamily::Meta,
            HEAD_ROOT_KEY.as_bytes().to_vec(),
            root.as_bytes().to_vec(),
        )
    }

    // ==================== UTILITY OPERATIONS ====================

    /// Compact database
    pub fn compact(&self) -> StorageResult<()> {
        tracing::info!("Compacting database...");

        for cf_type in ColumnFamily::all() {
            if let Ok(cf) = self.cf(cf_type) {
                self.db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
            }
        }

        tracing::info!("Database compaction complete");
        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> StorageResult<DatabaseStats> {
        Ok(DatabaseStats {
            head_root: self.head_root()?,
            code_entries: self.count(ColumnFamily::Code)?,
            state_entries: self.count(ColumnFamily::StateNodes)?,
            storage_entries: self.count(ColumnFamily::StorageNodes)?,
        })
    }

    /// Flush memtables and release the handle
    pub fn close(self) -> StorageResult<()> {
        self.db.flush()?;
        tracing::info!("Database closed at {}", self.config.path);
        Ok(())
    }

    /// Get column family handle
    fn cf(&self, cf_type: ColumnFamily) -> StorageResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf_type.as_str())
            .ok_or_else(|| StorageError::DatabaseError(format!("{} CF not found", cf_type.as_str())))
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub head_root: Option<H256>,
    pub code_entries: usize,
    pub state_entries: usize,
    pub storage_entries: usize,
}

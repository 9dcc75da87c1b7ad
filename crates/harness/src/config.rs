// harness/src/config.rs
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use smart_contracts::LogConfig;
use std::path::Path;
use storage::DatabaseConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub data_dir: String,
    pub artifacts: ArtifactConfig,
    pub accounts: AccountsConfig,
    pub chain: ChainConfig,
    pub coin: CoinConfig,
    pub storage: StorageConfig,
    /// Record a struct log of every executed opcode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub bin: String,
    pub abi: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Bytes the sender address is derived from
    pub sender_seed: String,
    pub receiver_seed: String,
    /// Funding balance, spent as gas across the run
    pub initial_balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub block_number: u64,
    /// Seed of the hash the header is requested under
    pub header_seed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinConfig {
    pub mint_amount: u64,
    pub transfers: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub cache_entries: usize,
    pub max_open_files: i32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            artifacts: ArtifactConfig {
                bin: "./coin_sol_Coin.bin".into(),
                abi: "./coin_sol_Coin.abi".into(),
            },
            accounts: AccountsConfig {
                sender_seed: "xujingshi".into(),
                receiver_seed: "andone".into(),
                initial_balance: 1_000_000_000_000_000_000,
            },
            chain: ChainConfig {
                block_number: 7_280_001,
                header_seed: "xujingshi".into(),
            },
            coin: CoinConfig {
                mint_amount: 1_000_000,
                transfers: vec![11, 19],
            },
            storage: StorageConfig {
                cache_entries: 4096,
                max_open_files: 100,
            },
            trace: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn sender(&self) -> Address {
        evm_core::bytes_to_address(self.accounts.sender_seed.as_bytes())
    }

    pub fn receiver(&self) -> Address {
        evm_core::bytes_to_address(self.accounts.receiver_seed.as_bytes())
    }

    /// Where the state store lives under the data directory
    pub fn database_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join("chaindata")
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            max_open_files: self.storage.max_open_files,
            cache_size: self.storage.cache_entries,
            ..DatabaseConfig::at(self.database_path())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = HarnessConfig::default();
        config.coin.transfers = vec![1, 2, 3];
        config.trace = Some(LogConfig {
            limit: 10,
            ..Default::default()
        });
        config.to_file(&path).unwrap();

        let loaded = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(loaded.coin.transfers, vec![1, 2, 3]);
        assert_eq!(loaded.trace.unwrap().limit, 10);
        assert_eq!(loaded.accounts.initial_balance, 1_000_000_000_000_000_000);
    }

    #[test]
    fn test_seeded_addresses() {
        let config = HarnessConfig::default();
        let sender = config.sender();
        assert_eq!(&sender.as_bytes()[11..], b"xujingshi");
        assert!(sender.as_bytes()[..11].iter().all(|b| *b == 0));
        assert_ne!(config.sender(), config.receiver());
    }

    #[test]
    fn test_database_config_under_data_dir() {
        let config = HarnessConfig {
            data_dir: "/tmp/harness".into(),
            ..Default::default()
        };
        let db = config.database_config();
        assert!(db.path.ends_with("chaindata"));
        assert_eq!(db.max_open_files, 100);
    }
}

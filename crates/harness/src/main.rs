// harness/src/main.rs
use clap::{Parser, Subcommand};
use ethers_core::types::{Address, H256};
use harness::{CoinScenario, HarnessConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "evm-harness")]
#[command(about = "Deploy-and-call harness for the Coin contract", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the contract, run the calls and round-trip the state
    Run {
        /// Configuration file path, defaults apply when omitted
        #[arg(short, long)]
        config: Option<String>,

        /// Override data directory
        #[arg(short, long)]
        data_dir: Option<String>,
    },

    /// Write a default configuration
    Init {
        /// Data directory
        #[arg(short, long, default_value = "./data")]
        data_dir: String,
    },

    /// Read one account back from a persisted state
    Inspect {
        #[arg(short, long, default_value = "./data")]
        data_dir: String,

        /// State root, the head root when omitted
        #[arg(short, long)]
        root: Option<String>,

        /// Account address (hex)
        #[arg(short, long)]
        address: String,
    },

    /// Database operations
    Db {
        #[arg(short, long, default_value = "./data")]
        data_dir: String,

        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Show database statistics
    Stats,

    /// Compact database
    Compact,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "evm_harness={lvl},harness={lvl},smart_contracts={lvl},storage={lvl}",
                    lvl = log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run { config, data_dir } => run(config, data_dir)?,
        Commands::Init { data_dir } => init(&data_dir)?,
        Commands::Inspect {
            data_dir,
            root,
            address,
        } => {
            let config = with_data_dir(data_dir);
            let root = root.as_deref().map(parse_hash).transpose()?;
            let inspection = harness::inspect(&config.database_config(), root, parse_address(&address)?)?;
            println!("{}", inspection);
        }
        Commands::Db { data_dir, command } => handle_db_command(&with_data_dir(data_dir), command)?,
    }

    Ok(())
}

fn with_data_dir(data_dir: String) -> HarnessConfig {
    HarnessConfig {
        data_dir,
        ..Default::default()
    }
}

fn run(config_path: Option<String>, data_dir_override: Option<String>) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            HarnessConfig::from_file(&path)?
        }
        None => HarnessConfig::default(),
    };

    if let Some(data_dir) = data_dir_override {
        config.data_dir = data_dir;
    }

    tracing::info!("Running Coin scenario with data directory: {}", config.data_dir);
    let report = CoinScenario::new(config).run()?;
    println!("{}", report);

    Ok(())
}

fn init(data_dir: &str) -> anyhow::Result<()> {
    tracing::info!("Initializing harness at {}", data_dir);
    std::fs::create_dir_all(data_dir)?;

    let config = with_data_dir(data_dir.to_string());
    let path = format!("{}/config.toml", data_dir);
    config.to_file(&path)?;

    tracing::info!("Edit {} to point at the contract artifacts", path);
    Ok(())
}

fn handle_db_command(config: &HarnessConfig, command: DbCommands) -> anyhow::Result<()> {
    let db = storage::Database::open(config.database_config())?;
    match command {
        DbCommands::Stats => {
            let stats = db.stats()?;
            tracing::info!("Database statistics:");
            println!("head root       {:?}", stats.head_root);
            println!("code entries    {}", stats.code_entries);
            println!("state nodes     {}", stats.state_entries);
            println!("storage nodes   {}", stats.storage_entries);
        }
        DbCommands::Compact => db.compact()?,
    }
    db.close()?;
    Ok(())
}

fn decode_fixed(text: &str, len: usize) -> anyhow::Result<Vec<u8>> {
    let text = text.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let bytes = hex::decode(text)?;
    anyhow::ensure!(bytes.len() == len, "expected {} bytes, got {}", len, bytes.len());
    Ok(bytes)
}

fn parse_address(text: &str) -> anyhow::Result<Address> {
    Ok(Address::from_slice(&decode_fixed(text, 20)?))
}

fn parse_hash(text: &str) -> anyhow::Result<H256> {
    Ok(H256::from_slice(&decode_fixed(text, 32)?))
}

// smart-contracts/src/artifact.rs

//! Compiled contract artifacts: hex bytecode and the solc ABI descriptor

use crate::{ContractError, ContractResult};
use ethers_core::abi::{Abi, RawLog, Token};
use evm_core::Log;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Decode hex text, tolerating surrounding whitespace and a `0x` prefix
pub fn decode_hex(text: &str) -> ContractResult<Vec<u8>> {
    let text = text.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    hex::decode(text).map_err(|e| ContractError::ArtifactError(format!("invalid bytecode hex: {}", e)))
}

/// Load contract bytecode stored as hex text
pub fn load_bin(path: impl AsRef<Path>) -> ContractResult<Vec<u8>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let code = decode_hex(&text)?;
    tracing::debug!(path = %path.as_ref().display(), len = code.len(), "loaded bytecode");
    Ok(code)
}

/// Load a solc ABI JSON file
pub fn load_abi(path: impl AsRef<Path>) -> ContractResult<Abi> {
    let file = File::open(path.as_ref())?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        ContractError::ArtifactError(format!("invalid ABI in {}: {}", path.as_ref().display(), e))
    })
}

/// Bytecode and interface of one compiled contract
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub bytecode: Vec<u8>,
    pub abi: Abi,
}

/// An event decoded from a log
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    pub params: Vec<(String, Token)>,
}

impl ContractArtifact {
    pub fn new(name: impl Into<String>, bytecode: Vec<u8>, abi: Abi) -> Self {
        Self {
            name: name.into(),
            bytecode,
            abi,
        }
    }

    /// Load `<name>.bin` and `<name>.abi` style paths
    pub fn load(name: impl Into<String>, bin: impl AsRef<Path>, abi: impl AsRef<Path>) -> ContractResult<Self> {
        Ok(Self::new(name, load_bin(bin)?, load_abi(abi)?))
    }

    /// Calldata for `method` with `args`
    pub fn encode_call(&self, method: &str, args: &[Token]) -> ContractResult<Vec<u8>> {
        let function = self.abi.function(method)?;
        Ok(function.encode_input(args)?)
    }

    pub fn decode_output(&self, method: &str, output: &[u8]) -> ContractResult<Vec<Token>> {
        let function = self.abi.function(method)?;
        Ok(function.decode_output(output)?)
    }

    /// Match a log against the ABI's events by its first topic
    pub fn decode_log(&self, log: &Log) -> ContractResult<DecodedEvent> {
        let topic = log
            .topics
            .first()
            .ok_or_else(|| ContractError::ArtifactError("anonymous log".into()))?;
        let event = self
            .abi
            .events()
            .find(|event| event.signature() == *topic)
            .ok_or_else(|| ContractError::ArtifactError(format!("no event with topic {:?}", topic)))?;

        let parsed = event.parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.clone(),
        })?;
        Ok(DecodedEvent {
            name: event.name.clone(),
            params: parsed.params.into_iter().map(|p| (p.name, p.value)).collect(),
        })
    }
}

// harness/src/scenario.rs

use crate::{HarnessConfig, HarnessError, HarnessResult};
use ethers_core::abi::Token;
use ethers_core::types::{Address, H256, U256};
use evm_core::chain::BLOCK_HASH_WINDOW;
use evm_core::{BlockContext, ChainContext, CoreError, Gas, Log, MockChain, TxContext};
use smart_contracts::{ContractArtifact, DecodedEvent, Evm, StateDb, StructLogger, VmConfig};
use std::fmt;
use std::sync::Arc;
use storage::{Database, StateDatabase};

/// Gas left to the funding account after one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasStep {
    pub label: String,
    pub gas_left: Gas,
}

/// Everything a Coin run observed
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub root: H256,
    pub contract: Address,
    pub sender: Address,
    pub receiver: Address,
    pub minter: Address,
    pub receiver_balance: U256,
    pub sender_balance: U256,
    pub gas_trail: Vec<GasStep>,
    pub logs: Vec<Log>,
    pub events: Vec<DecodedEvent>,
    pub storage_before: Vec<(H256, H256)>,
    pub storage_after: Vec<(H256, H256)>,
    pub code: Vec<u8>,
    pub reopened_code: Vec<u8>,
    /// Opcodes recorded by the struct logger, zero when tracing is off
    pub trace_steps: usize,
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "contract  {:?}", self.contract)?;
        writeln!(f, "minter    {:?}", self.minter)?;
        writeln!(f, "balances  receiver={} sender={}", self.receiver_balance, self.sender_balance)?;
        for step in &self.gas_trail {
            writeln!(f, "gas       {:<16} {}", step.label, step.gas_left)?;
        }
        for log in &self.logs {
            for topic in &log.topics {
                writeln!(f, "topic     {:?}", topic)?;
            }
            writeln!(f, "data      0x{}", hex::encode(&log.data))?;
        }
        for (key, value) in &self.storage_after {
            writeln!(f, "key={:x},value={:x}", key, value)?;
        }
        write!(f, "root      {:?}", self.root)
    }
}

/// Deploy the Coin contract, mint, transfer, then round-trip the state through the store
pub struct CoinScenario {
    config: HarnessConfig,
}

/// Calls against one deployed contract, paying gas out of the sender's balance
struct Session<'s, 'a> {
    evm: &'s mut Evm<'a>,
    artifact: &'s ContractArtifact,
    contract: Address,
    payer: Address,
    gas_trail: Vec<GasStep>,
}

impl Session<'_, '_> {
    fn gas_allowance(&self) -> Gas {
        evm_core::u256_to_u64_saturating(self.evm.state().get_balance(&self.payer))
    }

    fn record(&mut self, label: String, gas_left: Gas) {
        self.evm.state_mut().set_balance(&self.payer, U256::from(gas_left));
        tracing::info!(step = %label, gas_left, "testBalance");
        self.gas_trail.push(GasStep { label, gas_left });
    }

    fn call(&mut self, caller: Address, method: &str, args: &[Token]) -> HarnessResult<Vec<Token>> {
        let input = self.artifact.encode_call(method, args)?;
        let gas = self.gas_allowance();
        let (output, gas_left) = self
            .evm
            .call(caller, self.contract, input, gas, U256::zero())
            .into_result()?;
        tracing::debug!(method, output = %hex::encode(&output), "call returned");
        self.record(method.to_string(), gas_left);
        Ok(self.artifact.decode_output(method, &output)?)
    }

    fn call_uint(&mut self, caller: Address, method: &str, args: &[Token]) -> HarnessResult<U256> {
        match self.call(caller, method, args)?.as_slice() {
            [Token::Uint(value)] => Ok(*value),
            other => Err(HarnessError::UnexpectedOutput {
                method: method.to_string(),
                detail: format!("{:?}", other),
            }),
        }
    }
}

fn storage_of(state: &mut StateDb, address: &Address) -> Vec<(H256, H256)> {
    let mut entries = Vec::new();
    state.for_each_storage(address, |key, value| {
        entries.push((*key, *value));
        true
    });
    entries
}

/// The deployer must be the contract's recorded minter
pub fn check_minter(expected: Address, got: Address) -> HarnessResult<()> {
    if got != expected {
        return Err(HarnessError::MinterMismatch { expected, got });
    }
    Ok(())
}

/// Code and storage read back from the reopened store must match what was committed
pub fn verify_round_trip(
    contract: Address,
    code_before: &[u8],
    code_after: &[u8],
    storage_before: &[(H256, H256)],
    storage_after: &[(H256, H256)],
) -> HarnessResult<()> {
    if code_after != code_before {
        return Err(HarnessError::CodeChanged(contract));
    }
    if storage_after != storage_before {
        return Err(HarnessError::StorageChanged(contract));
    }
    Ok(())
}

fn release(backend: Arc<StateDatabase>) -> HarnessResult<()> {
    let backend = Arc::try_unwrap(backend).map_err(|_| HarnessError::StoreInUse)?;
    Ok(backend.close()?)
}

impl CoinScenario {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn run(&self) -> HarnessResult<ScenarioReport> {
        let config = &self.config;
        let sender = config.sender();
        let receiver = config.receiver();

        let artifact = ContractArtifact::load("Coin", &config.artifacts.bin, &config.artifacts.abi)?;

        let chain = MockChain::new(sender)
            .with_genesis(config.chain.block_number.saturating_sub(BLOCK_HASH_WINDOW));
        let header_hash = evm_core::bytes_to_hash(config.chain.header_seed.as_bytes());
        let header = chain
            .header(&header_hash, config.chain.block_number)
            .ok_or(CoreError::HeaderNotFound {
                hash: header_hash,
                number: config.chain.block_number,
            })?;
        let block = BlockContext::new(&header, Arc::new(chain), Some(sender))?;

        let backend = Arc::new(StateDatabase::new(Database::open(config.database_config())?));
        let mut state = StateDb::new(H256::zero(), backend.clone())?;

        state.create_account(&sender);
        state.create_account(&receiver);
        state.add_balance(&sender, U256::from(config.accounts.initial_balance));
        tracing::info!(balance = config.accounts.initial_balance, "init testBalance");

        let mut logger = StructLogger::new(config.trace.clone().unwrap_or_default());
        let vm_config = VmConfig {
            debug: config.trace.is_some(),
            ..Default::default()
        };
        let tx = TxContext {
            origin: sender,
            gas_price: U256::zero(),
        };

        let (contract, code, gas_trail, minter, receiver_balance, sender_balance, logs) = {
            let mut evm = Evm::new(block, tx, &mut state, vm_config).with_tracer(&mut logger);

            let gas = evm_core::u256_to_u64_saturating(evm.state().get_balance(&sender));
            let (code, contract, gas_left) = evm
                .create(sender, artifact.bytecode.clone(), gas, U256::zero())
                .into_result()?;
            tracing::info!(?contract, code_len = code.len(), "contract deployed");

            let mut session = Session {
                evm: &mut evm,
                artifact: &artifact,
                contract,
                payer: sender,
                gas_trail: Vec::new(),
            };
            session.record("create".to_string(), gas_left);

            let minter = match session.call(sender, "minter", &[])?.as_slice() {
                [Token::Address(minter)] => *minter,
                other => {
                    return Err(HarnessError::UnexpectedOutput {
                        method: "minter".into(),
                        detail: format!("{:?}", other),
                    })
                }
            };
            check_minter(sender, minter)?;

            session.call(
                minter,
                "mint",
                &[Token::Address(minter), Token::Uint(U256::from(config.coin.mint_amount))],
            )?;
            for amount in &config.coin.transfers {
                session.call(minter, "send", &[Token::Address(receiver), Token::Uint(U256::from(*amount))])?;
            }

            let receiver_balance = session.call_uint(sender, "balances", &[Token::Address(receiver)])?;
            let sender_balance = session.call_uint(sender, "balances", &[Token::Address(minter)])?;
            tracing::info!(%receiver_balance, %sender_balance, "balances");

            let gas_trail = session.gas_trail;
            let logs = evm.state().logs().to_vec();
            (contract, code, gas_trail, minter, receiver_balance, sender_balance, logs)
        };

        let events = logs
            .iter()
            .map(|log| artifact.decode_log(log))
            .collect::<Result<Vec<_>, _>>()?;
        for event in &events {
            tracing::debug!(event = %event.name, params = ?event.params, "decoded log");
        }

        let storage_before = storage_of(&mut state, &contract);
        let root = state.commit(true)?;
        let flushed = backend.flush(root)?;
        tracing::info!(root = ?root, flushed, "Root Hash");
        drop(state);
        release(backend)?;

        // reopen the store and reload the committed state
        let backend = Arc::new(StateDatabase::new(Database::open(config.database_config())?));
        let (reopened_code, storage_after) = {
            let mut state = StateDb::new(root, backend.clone())?;
            tracing::info!(balance = %state.get_balance(&sender), "get testBalance");
            let reopened_code = state.get_code(&contract).as_ref().clone();
            (reopened_code, storage_of(&mut state, &contract))
        };
        release(backend)?;

        verify_round_trip(contract, &code, &reopened_code, &storage_before, &storage_after)?;

        Ok(ScenarioReport {
            root,
            contract,
            sender,
            receiver,
            minter,
            receiver_balance,
            sender_balance,
            gas_trail,
            logs,
            events,
            storage_before,
            storage_after,
            code,
            reopened_code,
            trace_steps: logger.struct_logs().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(key: u64, value: u64) -> (H256, H256) {
        (H256::from_low_u64_be(key), H256::from_low_u64_be(value))
    }

    #[test]
    fn test_minter_must_be_the_deployer() {
        let deployer = Address::repeat_byte(1);
        assert!(check_minter(deployer, deployer).is_ok());

        let other = Address::repeat_byte(2);
        let err = check_minter(deployer, other).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::MinterMismatch { expected, got } if expected == deployer && got == other
        ));
    }

    #[test]
    fn test_round_trip_detects_code_change() {
        let contract = Address::repeat_byte(7);
        let storage = vec![slot(0, 1)];

        assert!(verify_round_trip(contract, &[0x60, 0x00], &[0x60, 0x00], &storage, &storage).is_ok());

        let err = verify_round_trip(contract, &[0x60, 0x00], &[0x60, 0x01], &storage, &storage).unwrap_err();
        assert!(matches!(err, HarnessError::CodeChanged(address) if address == contract));
        // truncated code counts as a change too
        let err = verify_round_trip(contract, &[0x60, 0x00], &[], &storage, &storage).unwrap_err();
        assert!(matches!(err, HarnessError::CodeChanged(_)));
    }

    #[test]
    fn test_round_trip_detects_storage_change() {
        let contract = Address::repeat_byte(7);
        let code = [0x00];
        let before = vec![slot(0, 1), slot(1, 2)];

        let changed_value = vec![slot(0, 1), slot(1, 3)];
        let err = verify_round_trip(contract, &code, &code, &before, &changed_value).unwrap_err();
        assert!(matches!(err, HarnessError::StorageChanged(address) if address == contract));

        let lost_slot = vec![slot(0, 1)];
        let err = verify_round_trip(contract, &code, &code, &before, &lost_slot).unwrap_err();
        assert!(matches!(err, HarnessError::StorageChanged(_)));
    }
}

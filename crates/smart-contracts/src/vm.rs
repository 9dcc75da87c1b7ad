// smart-contracts/src/vm.rs

use crate::{
    adapter::{from_revm_address, from_revm_hash, to_revm_address, to_revm_u256, StateAdapter},
    state::StateDb,
    tracer::{Tracer, TracerInspector},
    ContractError, ContractResult,
};
use ethers_core::types::{Address, U256};
use evm_core::{BlockContext, Gas, Log, Nonce, TxContext};
use revm::primitives::{
    CreateScheme, Env, ExecutionResult as RevmResult, Output, SpecId, TransactTo, U256 as RevmU256,
};
use serde::{Deserialize, Serialize};

/// Contract code size limit (EIP-170)
pub const MAX_CODE_SIZE: usize = 24576;

/// Engine switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmConfig {
    /// Invoke the tracer, if one is attached
    pub debug: bool,
    /// Hard fork rules to execute under
    pub spec: SpecId,
    /// Largest deployable code
    pub max_code_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            debug: false,
            spec: SpecId::PETERSBURG,
            max_code_size: MAX_CODE_SIZE,
        }
    }
}

/// What one transaction did; its state changes are already in the `StateDb`
#[derive(Debug)]
pub struct Execution {
    /// Return data, deployed code for creations, revert data on revert
    pub output: Vec<u8>,
    /// Gas charged after refunds, intrinsic cost included
    pub gas_used: Gas,
    /// Address of the deployed contract
    pub created: Option<Address>,
    pub logs: Vec<Log>,
    /// Why execution stopped early; the transaction itself stays valid
    pub error: Option<ContractError>,
}

/// Result of a message call
#[derive(Debug)]
pub struct CallOutcome {
    /// Return data, or revert data when the callee reverted
    pub output: Vec<u8>,
    /// Gas handed back to the caller
    pub gas_left: Gas,
    pub error: Option<ContractError>,
}

impl CallOutcome {
    fn failed(error: ContractError, gas_left: Gas) -> Self {
        Self {
            output: Vec::new(),
            gas_left,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Output and leftover gas, or the error that stopped the call
    pub fn into_result(self) -> ContractResult<(Vec<u8>, Gas)> {
        match self.error {
            Some(err) => Err(err),
            None => Ok((self.output, self.gas_left)),
        }
    }
}

/// Result of a contract creation
#[derive(Debug)]
pub struct CreateOutcome {
    /// Deployed code on success, revert data on revert
    pub output: Vec<u8>,
    pub address: Address,
    pub gas_left: Gas,
    pub error: Option<ContractError>,
}

impl CreateOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Deployed code, address and leftover gas, or the error that stopped the creation
    pub fn into_result(self) -> ContractResult<(Vec<u8>, Address, Gas)> {
        match self.error {
            Some(err) => Err(err),
            None => Ok((self.output, self.address, self.gas_left)),
        }
    }
}

/// revm bound to one block, one transaction context and one state view.
///
/// Every `call` and `create` runs as its own revm transaction and commits its
/// account changes into the `StateDb` before returning.
pub struct Evm<'a> {
    pub block: BlockContext,
    pub tx: TxContext,
    state: &'a mut StateDb,
    config: VmConfig,
    tracer: Option<&'a mut dyn Tracer>,
}

impl<'a> Evm<'a> {
    pub fn new(block: BlockContext, tx: TxContext, state: &'a mut StateDb, config: VmConfig) -> Self {
        Self {
            block,
            tx,
            state,
            config,
            tracer: None,
        }
    }

    /// Attach a tracer; it only sees steps when `debug` is set
    pub fn with_tracer(mut self, tracer: &'a mut dyn Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn state(&self) -> &StateDb {
        &*self.state
    }

    pub fn state_mut(&mut self) -> &mut StateDb {
        &mut *self.state
    }

    /// Switch to the next transaction of the block
    pub fn set_tx_context(&mut self, tx: TxContext) {
        self.tx = tx;
    }

    fn env(&self, caller: Address, to: Option<Address>, input: Vec<u8>, gas: Gas, value: U256, nonce: Option<Nonce>) -> Env {
        let mut env = Env::default();
        env.cfg.spec_id = self.config.spec;
        env.cfg.limit_contract_code_size = Some(self.config.max_code_size);
        // the gas allowance of a call is not bounded by the block
        env.cfg.disable_block_gas_limit = true;

        env.block.number = RevmU256::from(self.block.number);
        env.block.coinbase = to_revm_address(&self.block.coinbase);
        env.block.timestamp = RevmU256::from(self.block.timestamp);
        env.block.difficulty = to_revm_u256(self.block.difficulty);
        env.block.gas_limit = RevmU256::from(self.block.gas_limit);
        env.block.basefee = RevmU256::ZERO;

        env.tx.caller = to_revm_address(&caller);
        env.tx.transact_to = match to {
            Some(to) => TransactTo::Call(to_revm_address(&to)),
            None => TransactTo::Create(CreateScheme::Create),
        };
        env.tx.data = input.into();
        env.tx.value = to_revm_u256(value);
        env.tx.gas_limit = gas;
        env.tx.gas_price = to_revm_u256(self.tx.gas_price);
        env.tx.nonce = nonce;
        env
    }

    /// Run one transaction from `caller` and commit its changes.
    ///
    /// `to` of `None` deploys `input` as init code. With a `nonce` the
    /// caller's state nonce must match it. Errors invalidate the transaction
    /// and leave the state untouched.
    pub fn execute(
        &mut self,
        caller: Address,
        to: Option<Address>,
        input: Vec<u8>,
        gas: Gas,
        value: U256,
        nonce: Option<Nonce>,
    ) -> ContractResult<Execution> {
        let debug = self.config.debug;
        if let Some(tracer) = self.tracer.as_deref_mut().filter(|_| debug) {
            tracer.capture_start(caller, to, &input, gas, value);
        }

        let env = self.env(caller, to, input, gas, value, nonce);
        let result = {
            let mut evm = revm::EVM::new();
            evm.env = env;
            evm.database(StateAdapter::new(&mut *self.state, &self.block));
            match self.tracer.as_deref_mut().filter(|_| debug) {
                Some(tracer) => evm.inspect_commit(TracerInspector::new(tracer)),
                None => evm.transact_commit(),
            }
        };
        if let Some(err) = self.state.error() {
            return Err(ContractError::StateError(err.to_string()));
        }

        let execution = match result {
            Ok(result) => self.settle(result),
            Err(err) => {
                let err = ContractError::from(err);
                tracing::debug!(?caller, ?to, error = %err, "transaction rejected");
                return Err(err);
            }
        };

        if let Some(tracer) = self.tracer.as_deref_mut().filter(|_| debug) {
            tracer.capture_end(&execution.output, execution.gas_used, execution.error.as_ref());
        }
        if let Some(err) = &execution.error {
            tracing::debug!(?caller, ?to, gas_used = execution.gas_used, error = %err, "execution stopped");
        }
        Ok(execution)
    }

    /// Record the logs of a finished transaction and summarise it
    fn settle(&mut self, result: RevmResult) -> Execution {
        match result {
            RevmResult::Success {
                gas_used,
                logs,
                output,
                ..
            } => {
                let first = self.state.logs().len();
                for log in logs {
                    self.state.add_log(Log::new(
                        from_revm_address(&log.address),
                        log.topics.iter().map(from_revm_hash).collect(),
                        log.data.to_vec(),
                        self.block.number,
                    ));
                }
                let (output, created) = match output {
                    Output::Call(bytes) => (bytes.to_vec(), None),
                    Output::Create(bytes, address) => (bytes.to_vec(), address.as_ref().map(from_revm_address)),
                };
                Execution {
                    output,
                    gas_used,
                    created,
                    logs: self.state.logs()[first..].to_vec(),
                    error: None,
                }
            }
            RevmResult::Revert { gas_used, output } => Execution {
                output: output.to_vec(),
                gas_used,
                created: None,
                logs: Vec::new(),
                error: Some(ContractError::Revert(output.to_vec())),
            },
            RevmResult::Halt { reason, gas_used } => Execution {
                output: Vec::new(),
                gas_used,
                created: None,
                logs: Vec::new(),
                error: Some(ContractError::Halt(format!("{:?}", reason))),
            },
        }
    }

    /// Execute the code at `address` with `input`, transferring `value` from `caller`
    pub fn call(&mut self, caller: Address, address: Address, input: Vec<u8>, gas: Gas, value: U256) -> CallOutcome {
        match self.execute(caller, Some(address), input, gas, value, None) {
            Ok(execution) => CallOutcome {
                output: execution.output,
                gas_left: gas.saturating_sub(execution.gas_used),
                error: execution.error,
            },
            Err(err) => CallOutcome::failed(err, gas),
        }
    }

    /// Deploy `code` at the address derived from the caller and its nonce
    pub fn create(&mut self, caller: Address, code: Vec<u8>, gas: Gas, value: U256) -> CreateOutcome {
        let address = ethers_core::utils::get_contract_address(caller, self.state.get_nonce(&caller));
        match self.execute(caller, None, code, gas, value, None) {
            Ok(execution) => {
                if let Some(created) = execution.created {
                    tracing::debug!(?created, code_len = execution.output.len(), "contract created");
                }
                CreateOutcome {
                    output: execution.output,
                    address,
                    gas_left: gas.saturating_sub(execution.gas_used),
                    error: execution.error,
                }
            }
            Err(err) => CreateOutcome {
                output: Vec::new(),
                address,
                gas_left: gas,
                error: Some(err),
            },
        }
    }
}

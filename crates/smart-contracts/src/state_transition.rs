// smart-contracts/src/state_transition.rs

use crate::{vm::Evm, ContractError, ContractResult};
use ethers_core::types::Address;
use evm_core::{Gas, Log, Message};
use serde::{Deserialize, Serialize};

/// Gas still available to the transactions of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPool(Gas);

impl GasPool {
    pub fn new(gas: Gas) -> Self {
        Self(gas)
    }

    /// Reserve `amount` for a transaction
    pub fn sub_gas(&mut self, amount: Gas) -> ContractResult<()> {
        if self.0 < amount {
            return Err(ContractError::GasLimitReached);
        }
        self.0 -= amount;
        Ok(())
    }

    /// Return unused gas to the pool
    pub fn add_gas(&mut self, amount: Gas) {
        self.0 = self.0.saturating_add(amount);
    }

    pub fn gas(&self) -> Gas {
        self.0
    }
}

/// Contract execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Gas used after refunds
    pub used_gas: Gas,
    /// The engine stopped with an error (the transaction is still valid)
    pub failed: bool,
    /// Return data, deployed code for creations
    pub output: Vec<u8>,
    /// Contract address (if deployment)
    pub contract_address: Option<Address>,
    /// Error message (if failed)
    pub error: Option<String>,
    /// Logs emitted
    pub logs: Vec<Log>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        !self.failed
    }
}

/// Apply `msg` to the engine's state as one transaction.
///
/// Errors returned here invalidate the message (bad nonce, unaffordable gas,
/// an exhausted gas pool). Execution failures are reported through
/// `ExecutionResult::failed` with the gas still charged. Gas buying, refunds
/// and the coinbase payment happen inside the transaction, so nothing carries
/// over from one message to the next.
pub fn apply_message(evm: &mut Evm<'_>, msg: &Message, gas_pool: &mut GasPool) -> ContractResult<ExecutionResult> {
    if msg.check_nonce {
        let expected = evm.state().get_nonce(&msg.from);
        if expected != msg.nonce {
            return Err(ContractError::NonceMismatch {
                expected,
                got: msg.nonce,
            });
        }
    }

    gas_pool.sub_gas(msg.gas_limit)?;
    evm.set_tx_context(msg.tx_context());

    let nonce = msg.check_nonce.then_some(msg.nonce);
    let execution = match evm.execute(msg.from, msg.to, msg.data.clone(), msg.gas_limit, msg.value, nonce) {
        Ok(execution) => execution,
        Err(err) => {
            gas_pool.add_gas(msg.gas_limit);
            return Err(err);
        }
    };
    gas_pool.add_gas(msg.gas_limit.saturating_sub(execution.gas_used));

    tracing::debug!(
        from = ?msg.from,
        used_gas = execution.gas_used,
        failed = execution.error.is_some(),
        logs = execution.logs.len(),
        "message applied"
    );

    Ok(ExecutionResult {
        used_gas: execution.gas_used,
        failed: execution.error.is_some(),
        output: execution.output,
        contract_address: execution.created,
        error: execution.error.map(|e| e.to_string()),
        logs: execution.logs,
    })
}

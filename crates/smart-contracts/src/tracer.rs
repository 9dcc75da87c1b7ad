// smart-contracts/src/tracer.rs

use crate::{
    adapter::{from_revm_address, from_revm_u256},
    ContractError,
};
use ethers_core::types::{Address, H256, U256};
use evm_core::Gas;
use revm::interpreter::{opcode, InstructionResult, Interpreter};
use revm::{Database, EVMData, Inspector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Interpreter state right before an opcode runs
#[derive(Debug, Clone, Copy)]
pub struct Step<'a> {
    pub pc: usize,
    pub op: u8,
    /// Gas remaining in the current frame
    pub gas: Gas,
    pub depth: usize,
    /// Account whose storage the frame runs against
    pub address: Address,
    /// Bottom of the stack first
    pub stack: &'a [U256],
}

/// Hooks the engine calls while executing a transaction
pub trait Tracer {
    /// A transaction is about to run; `to` is `None` for a creation
    fn capture_start(&mut self, from: Address, to: Option<Address>, input: &[u8], gas: Gas, value: U256);

    /// An opcode is about to execute
    fn capture_state(&mut self, step: &Step<'_>);

    /// The transaction finished
    fn capture_end(&mut self, output: &[u8], gas_used: Gas, err: Option<&ContractError>);
}

/// Mnemonic of an opcode byte
pub fn opcode_name(op: u8) -> &'static str {
    opcode::OPCODE_JUMPMAP[op as usize].unwrap_or("INVALID")
}

/// What the struct logger records per step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    pub disable_stack: bool,
    pub disable_storage: bool,
    /// Maximum number of steps kept, zero for no limit
    pub limit: usize,
}

/// One recorded execution step
#[derive(Debug, Clone)]
pub struct StructLog {
    pub pc: usize,
    pub op: u8,
    pub gas: Gas,
    /// Gas the step consumed, zero for the last step of a frame
    pub gas_cost: Gas,
    pub stack: Option<Vec<U256>>,
    pub storage: Option<BTreeMap<H256, H256>>,
    pub depth: usize,
    pub err: Option<String>,
}

impl StructLog {
    pub fn op_name(&self) -> &'static str {
        opcode_name(self.op)
    }
}

impl fmt::Display for StructLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16}pc={:08} gas={} cost={}",
            self.op_name(),
            self.pc,
            self.gas,
            self.gas_cost
        )?;
        if let Some(err) = &self.err {
            write!(f, " ERROR: {}", err)?;
        }
        if let Some(stack) = &self.stack {
            for (i, word) in stack.iter().enumerate().rev() {
                write!(f, "\n{:08}  {:#x}", stack.len() - 1 - i, word)?;
            }
        }
        if let Some(storage) = &self.storage {
            for (key, value) in storage {
                write!(f, "\n{:x}: {:x}", key, value)?;
            }
        }
        Ok(())
    }
}

/// Tracer collecting a `StructLog` per executed opcode
#[derive(Debug, Default)]
pub struct StructLogger {
    config: LogConfig,
    logs: Vec<StructLog>,
    changed_values: HashMap<Address, BTreeMap<H256, H256>>,
    /// The last log still waits for the next step to price it
    cost_pending: bool,
    output: Vec<u8>,
    gas_used: Gas,
    err: Option<String>,
}

impl StructLogger {
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn struct_logs(&self) -> &[StructLog] {
        &self.logs
    }

    /// Return data of the last traced transaction
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Gas used by the last traced transaction, intrinsic cost included
    pub fn gas_used(&self) -> Gas {
        self.gas_used
    }

    pub fn error(&self) -> Option<&str> {
        self.err.as_deref()
    }

    fn at_limit(&self) -> bool {
        self.config.limit != 0 && self.logs.len() >= self.config.limit
    }
}

impl Tracer for StructLogger {
    fn capture_start(&mut self, from: Address, to: Option<Address>, input: &[u8], gas: Gas, value: U256) {
        tracing::trace!(?from, ?to, input_len = input.len(), gas, %value, "trace start");
    }

    fn capture_state(&mut self, step: &Step<'_>) {
        if self.cost_pending {
            if let Some(last) = self.logs.last_mut() {
                if last.depth == step.depth {
                    last.gas_cost = last.gas.saturating_sub(step.gas);
                }
            }
            self.cost_pending = false;
        }
        if self.at_limit() {
            return;
        }

        // SSTORE is recorded before it runs, from its stack operands
        if step.op == opcode::SSTORE && step.stack.len() >= 2 {
            let top = step.stack.len() - 1;
            self.changed_values
                .entry(step.address)
                .or_default()
                .insert(
                    evm_core::u256_to_h256(step.stack[top]),
                    evm_core::u256_to_h256(step.stack[top - 1]),
                );
        }

        let log = StructLog {
            pc: step.pc,
            op: step.op,
            gas: step.gas,
            gas_cost: 0,
            stack: (!self.config.disable_stack).then(|| step.stack.to_vec()),
            storage: (!self.config.disable_storage)
                .then(|| self.changed_values.get(&step.address).cloned().unwrap_or_default()),
            depth: step.depth,
            err: None,
        };
        tracing::trace!(depth = step.depth, pc = step.pc, op = opcode_name(step.op), gas = step.gas, "step");
        self.logs.push(log);
        self.cost_pending = true;
    }

    fn capture_end(&mut self, output: &[u8], gas_used: Gas, err: Option<&ContractError>) {
        self.output = output.to_vec();
        self.gas_used = gas_used;
        self.err = err.map(|e| e.to_string());
        self.cost_pending = false;
        if let (Some(err), Some(last)) = (&self.err, self.logs.last_mut()) {
            last.err = Some(err.clone());
        }
        tracing::trace!(gas_used, steps = self.logs.len(), "trace end");
    }
}

/// Feeds revm interpreter steps to a `Tracer`
pub(crate) struct TracerInspector<'t, T: ?Sized> {
    tracer: &'t mut T,
}

impl<'t, T: Tracer + ?Sized> TracerInspector<'t, T> {
    pub(crate) fn new(tracer: &'t mut T) -> Self {
        Self { tracer }
    }
}

impl<DB: Database, T: Tracer + ?Sized> Inspector<DB> for TracerInspector<'_, T> {
    fn step(&mut self, interp: &mut Interpreter, data: &mut EVMData<'_, DB>) -> InstructionResult {
        let stack: Vec<U256> = interp.stack.data().iter().map(from_revm_u256).collect();
        self.tracer.capture_state(&Step {
            pc: interp.program_counter(),
            op: interp.current_opcode(),
            gas: interp.gas.remaining(),
            depth: data.journaled_state.depth() as usize,
            address: from_revm_address(&interp.contract.address),
            stack: &stack,
        });
        InstructionResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(pc: usize, op: u8, gas: Gas, depth: usize, stack: &[U256]) -> Step<'_> {
        Step {
            pc,
            op,
            gas,
            depth,
            address: Address::repeat_byte(1),
            stack,
        }
    }

    #[test]
    fn test_records_sstore_storage() {
        let mut logger = StructLogger::new(LogConfig::default());
        // value below key, as SSTORE pops key first
        let stack = [U256::from(42), U256::from(1)];
        logger.capture_state(&step(0, opcode::SSTORE, 100_000, 1, &stack));

        let log = &logger.struct_logs()[0];
        let storage = log.storage.as_ref().unwrap();
        assert_eq!(storage[&H256::from_low_u64_be(1)], H256::from_low_u64_be(42));
        assert_eq!(log.stack.as_ref().unwrap().len(), 2);
        assert!(log.to_string().starts_with("SSTORE"));
    }

    #[test]
    fn test_cost_comes_from_the_next_step_in_the_frame() {
        let mut logger = StructLogger::new(LogConfig::default());
        logger.capture_state(&step(0, opcode::PUSH1, 1000, 1, &[]));
        logger.capture_state(&step(2, opcode::CALL, 997, 1, &[]));
        logger.capture_state(&step(0, opcode::STOP, 500, 2, &[]));
        logger.capture_end(&[], 600, None);

        let costs: Vec<Gas> = logger.struct_logs().iter().map(|log| log.gas_cost).collect();
        assert_eq!(costs, vec![3, 0, 0]);
        assert_eq!(logger.gas_used(), 600);
    }

    #[test]
    fn test_limit_and_disabled_fields() {
        let mut logger = StructLogger::new(LogConfig {
            disable_stack: true,
            disable_storage: true,
            limit: 1,
        });

        logger.capture_state(&step(0, opcode::STOP, 10, 1, &[]));
        logger.capture_state(&step(1, opcode::STOP, 10, 1, &[]));

        assert_eq!(logger.struct_logs().len(), 1);
        let log = &logger.struct_logs()[0];
        assert!(log.stack.is_none() && log.storage.is_none());
    }

    #[test]
    fn test_failure_marks_last_step() {
        let mut logger = StructLogger::new(LogConfig::default());
        logger.capture_state(&step(3, opcode::JUMP, 10, 1, &[]));
        let err = ContractError::Halt("InvalidJump".into());
        logger.capture_end(&[], 10, Some(&err));

        assert_eq!(logger.struct_logs()[0].err.as_deref(), Some("execution halted: InvalidJump"));
        assert_eq!(logger.error(), Some("execution halted: InvalidJump"));
        assert_eq!(opcode_name(0xfe), "INVALID");
    }
}

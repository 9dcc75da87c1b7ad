// evm-core/src/message.rs

use crate::types::*;
use ethers_core::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// A call or contract creation to be applied to the state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Caller address
    pub from: Address,
    /// Target address (None for deployment)
    pub to: Option<Address>,
    /// Sender nonce expected by the state
    pub nonce: Nonce,
    /// Value to transfer
    pub value: U256,
    /// Gas limit
    pub gas_limit: Gas,
    /// Price paid per unit of gas
    pub gas_price: U256,
    /// Call data, or init code for deployments
    pub data: Vec<u8>,
    /// Whether the nonce must match the sender's state nonce
    pub check_nonce: bool,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from: Address,
        to: Option<Address>,
        nonce: Nonce,
        value: U256,
        gas_limit: Gas,
        gas_price: U256,
        data: Vec<u8>,
        check_nonce: bool,
    ) -> Self {
        Self {
            from,
            to,
            nonce,
            value,
            gas_limit,
            gas_price,
            data,
            check_nonce,
        }
    }

    /// Create a contract deployment
    pub fn deploy(from: Address, nonce: Nonce, init_code: Vec<u8>, gas_limit: Gas) -> Self {
        Self::new(from, None, nonce, U256::zero(), gas_limit, U256::zero(), init_code, true)
    }

    /// Check if this is a contract deployment
    pub fn is_deployment(&self) -> bool {
        self.to.is_none()
    }

    /// Transaction-level context the engine exposes through ORIGIN and GASPRICE
    pub fn tx_context(&self) -> TxContext {
        TxContext {
            origin: self.from,
            gas_price: self.gas_price,
        }
    }
}

/// Transaction-level environment of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxContext {
    pub origin: Address,
    pub gas_price: U256,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_message() {
        let msg = Message::deploy(Address::zero(), 0, vec![0x60, 0x00], 100_000);
        assert!(msg.is_deployment());
        assert!(msg.check_nonce);
        assert_eq!(msg.tx_context().origin, Address::zero());
    }
}

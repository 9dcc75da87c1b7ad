// evm-core/src/types.rs

use ethers_core::types::{Address, H256, U256};

/// Block number/height
pub type BlockNumber = u64;

/// Account nonce
pub type Nonce = u64;

/// Gas limit/used
pub type Gas = u64;

/// Timestamp in Unix epoch seconds
pub type Timestamp = u64;

/// Address from arbitrary bytes: keeps the rightmost 20 bytes, left-pads shorter input
pub fn bytes_to_address(bytes: &[u8]) -> Address {
    let mut out = [0u8; 20];
    let take = bytes.len().min(20);
    out[20 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    Address::from(out)
}

/// Hash from arbitrary bytes: keeps the rightmost 32 bytes, left-pads shorter input
pub fn bytes_to_hash(bytes: &[u8]) -> H256 {
    let mut out = [0u8; 32];
    let take = bytes.len().min(32);
    out[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    H256::from(out)
}

pub fn u256_to_h256(value: U256) -> H256 {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    H256::from(out)
}

pub fn h256_to_u256(value: &H256) -> U256 {
    U256::from_big_endian(value.as_bytes())
}

pub fn address_to_u256(address: &Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

pub fn u256_to_address(value: U256) -> Address {
    bytes_to_address(u256_to_h256(value).as_bytes())
}

/// Saturating conversion for offsets and lengths taken off the stack
pub fn u256_to_u64_saturating(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.low_u64()
    }
}

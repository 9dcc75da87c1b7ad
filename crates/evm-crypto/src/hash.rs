// evm-crypto/src/hash.rs

use ethers_core::types::H256;
use sha3::{Digest, Keccak256};

/// Keccak-256 of the empty byte string, the code hash of accounts without code
pub const KECCAK_EMPTY: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

/// Trait for types that can be hashed
pub trait Hashable {
    fn hash(&self) -> H256;
}

impl Hashable for [u8] {
    fn hash(&self) -> H256 {
        let mut hasher = Keccak256::new();
        hasher.update(self);
        H256(hasher.finalize().into())
    }
}

impl Hashable for Vec<u8> {
    fn hash(&self) -> H256 {
        self.as_slice().hash()
    }
}

impl Hashable for &str {
    fn hash(&self) -> H256 {
        self.as_bytes().hash()
    }
}

/// Keccak-256 digest
pub fn keccak256(data: &[u8]) -> H256 {
    data.hash()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_known_vectors() {
        assert_eq!(keccak256(b""), KECCAK_EMPTY);
        assert_eq!(
            hex::encode(&keccak256(b"minter()").as_bytes()[..4]),
            "07546172"
        );
    }

    #[test]
    fn test_hashable_impls_agree() {
        let data = b"test data".to_vec();
        assert_eq!(data.hash(), data.as_slice().hash());
        assert_eq!("test data".hash(), keccak256(b"test data"));
    }
}

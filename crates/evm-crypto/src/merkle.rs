// evm-crypto/src/merkle.rs

use crate::{hash::Hashable, CryptoError, CryptoResult};
use ethers_core::types::H256;
use serde::{Deserialize, Serialize};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Keccak binary Merkle tree used for state and storage commitments.
///
/// Leaves and inner nodes hash under different one-byte prefixes. A level
/// with an odd node count carries its last node up unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    /// Levels from the hashed leaves up to the root
    levels: Vec<Vec<H256>>,
}

impl MerkleTree {
    /// Build a tree over `leaves`, in the order given
    pub fn new<T: AsRef<[u8]>>(leaves: &[T]) -> CryptoResult<Self> {
        if leaves.is_empty() {
            return Err(CryptoError::MerkleError("Cannot create empty tree".into()));
        }

        let mut level: Vec<H256> = leaves.iter().map(|leaf| leaf_hash(leaf.as_ref())).collect();
        let mut levels = Vec::new();
        while level.len() > 1 {
            let parents = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    _ => pair[0],
                })
                .collect();
            levels.push(std::mem::replace(&mut level, parents));
        }
        levels.push(level);

        Ok(Self { levels })
    }

    /// Root over `leaves`, or the zero hash when there are none
    pub fn root_of<T: AsRef<[u8]>>(leaves: &[T]) -> H256 {
        match Self::new(leaves) {
            Ok(tree) => tree.root(),
            Err(_) => H256::zero(),
        }
    }

    pub fn root(&self) -> H256 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Inclusion proof for the leaf at `index`
    pub fn proof(&self, index: usize) -> CryptoResult<MerkleProof> {
        if index >= self.leaf_count() {
            return Err(CryptoError::MerkleError(format!(
                "leaf {} out of bounds ({} leaves)",
                index,
                self.leaf_count()
            )));
        }

        let mut path = Vec::with_capacity(self.depth());
        let mut position = index;
        for level in &self.levels[..self.depth()] {
            let sibling = position ^ 1;
            if let Some(hash) = level.get(sibling) {
                path.push(ProofStep {
                    hash: *hash,
                    left: sibling < position,
                });
            }
            position /= 2;
        }

        Ok(MerkleProof {
            leaf_index: index,
            leaf_hash: self.levels[0][index],
            path,
        })
    }

    /// Check that `leaf_data` sits under `root` along `proof`
    pub fn verify_proof(root: H256, proof: &MerkleProof, leaf_data: &[u8]) -> bool {
        let leaf = leaf_hash(leaf_data);
        if leaf != proof.leaf_hash {
            return false;
        }

        let computed = proof.path.iter().fold(leaf, |acc, step| {
            if step.left {
                node_hash(&step.hash, &acc)
            } else {
                node_hash(&acc, &step.hash)
            }
        });
        computed == root
    }
}

fn leaf_hash(data: &[u8]) -> H256 {
    let mut bytes = Vec::with_capacity(data.len() + 1);
    bytes.push(LEAF_PREFIX);
    bytes.extend_from_slice(data);
    bytes.hash()
}

fn node_hash(left: &H256, right: &H256) -> H256 {
    let mut bytes = [0u8; 65];
    bytes[0] = NODE_PREFIX;
    bytes[1..33].copy_from_slice(left.as_bytes());
    bytes[33..].copy_from_slice(right.as_bytes());
    bytes.hash()
}

/// One sibling on the way from a leaf to the root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: H256,
    /// Sibling sits to the left of the running hash
    pub left: bool,
}

/// Merkle proof for verifying a leaf is in the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    leaf_index: usize,
    leaf_hash: H256,
    path: Vec<ProofStep>,
}

impl MerkleProof {
    pub fn leaf_index(&self) -> usize {
        self.leaf_index
    }

    pub fn leaf_hash(&self) -> H256 {
        self.leaf_hash
    }

    pub fn path(&self) -> &[ProofStep] {
        &self.path
    }

    pub fn verify(&self, root: H256, leaf_data: &[u8]) -> bool {
        MerkleTree::verify_proof(root, self, leaf_data)
    }
}

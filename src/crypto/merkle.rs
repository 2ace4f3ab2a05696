//! Roster Membership Tree
//!
//! Fixed-depth binary Merkle tree over per-player leaf digests using
//! SHA-256 with domain separation. Built once per game at creation and
//! never mutated afterwards - eliminated players keep their leaves, and
//! eligibility is enforced at the tally layer, not by pruning.
//!
//! Proofs produced here are witnesses for the external circuit; the
//! local [`MembershipTree::verify`] exists for tests and sanity checks.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::hash::Digest32;

/// Domain separator for tree leaf nodes.
const MERKLE_LEAF_DOMAIN: &[u8] = b"MOONHOWL_MERKLE_LEAF_V1";

/// Domain separator for tree internal nodes.
const MERKLE_NODE_DOMAIN: &[u8] = b"MOONHOWL_MERKLE_NODE_V1";

/// Canonical zero-leaf digest used to right-pad the roster to 2^depth.
fn zero_leaf() -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(b"MOONHOWL_MERKLE_EMPTY_V1");
    hasher.finalize().into()
}

/// Errors from tree construction and proof generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// Requested leaf index is outside [0, 2^depth).
    #[error("invalid leaf index {index} for tree of capacity {capacity}")]
    InvalidIndex {
        /// The offending index.
        index: usize,
        /// Tree capacity (2^depth).
        capacity: usize,
    },

    /// 2^depth is too small to hold the roster.
    #[error("depth {depth} holds {capacity} leaves, roster has {leaves}")]
    DepthTooSmall {
        /// Requested depth.
        depth: usize,
        /// Capacity at that depth.
        capacity: usize,
        /// Roster size.
        leaves: usize,
    },
}

/// Fixed-depth binary Merkle tree over a committed roster.
#[derive(Clone, Debug)]
pub struct MembershipTree {
    depth: usize,
    /// All tree levels (padded leaves at index 0, root at last index).
    levels: Vec<Vec<Digest32>>,
}

impl MembershipTree {
    /// Build a tree of exactly `depth` levels above the leaves.
    ///
    /// Each entry is hashed with domain separation to form level 0,
    /// right-padded with the canonical zero-leaf digest to 2^depth.
    pub fn build<T: AsRef<[u8]>>(entries: &[T], depth: usize) -> Result<Self, MerkleError> {
        let capacity = 1usize << depth;
        if entries.len() > capacity {
            return Err(MerkleError::DepthTooSmall {
                depth,
                capacity,
                leaves: entries.len(),
            });
        }

        let mut level: Vec<Digest32> = entries.iter().map(|e| hash_leaf(e.as_ref())).collect();
        level.resize(capacity, zero_leaf());

        let mut levels = Vec::with_capacity(depth + 1);
        levels.push(level.clone());

        while level.len() > 1 {
            let next: Vec<Digest32> = level
                .chunks(2)
                .map(|pair| hash_nodes(&pair[0], &pair[1]))
                .collect();
            levels.push(next.clone());
            level = next;
        }

        Ok(Self { depth, levels })
    }

    /// Tree depth (levels above the leaves).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Leaf capacity (2^depth).
    pub fn capacity(&self) -> usize {
        1 << self.depth
    }

    /// The committed root digest.
    pub fn root(&self) -> Digest32 {
        self.levels[self.depth][0]
    }

    /// Generate an inclusion proof for the leaf at `index`.
    ///
    /// The path is derived purely from the bit pattern of the index -
    /// no randomness, fully deterministic. Exactly `depth` siblings.
    pub fn proof(&self, index: usize) -> Result<MembershipProof, MerkleError> {
        if index >= self.capacity() {
            return Err(MerkleError::InvalidIndex {
                index,
                capacity: self.capacity(),
            });
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut current = index;

        // Walk up the tree, collecting sibling digests
        for level in &self.levels[..self.depth] {
            let is_left = current % 2 == 0;
            let sibling_index = if is_left { current + 1 } else { current - 1 };
            siblings.push(ProofNode {
                sibling: level[sibling_index],
                is_left,
            });
            current /= 2;
        }

        Ok(MembershipProof { siblings })
    }

    /// Verify a proof against a root digest.
    ///
    /// Authoritative verification happens inside the external circuit;
    /// this is the reference check used in tests.
    pub fn verify(root: &Digest32, proof: &MembershipProof, leaf_data: &[u8]) -> bool {
        let mut current = hash_leaf(leaf_data);

        for node in &proof.siblings {
            current = if node.is_left {
                hash_nodes(&current, &node.sibling)
            } else {
                hash_nodes(&node.sibling, &current)
            };
        }

        current == *root
    }
}

/// One level of a membership proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    /// Sibling digest at this level.
    pub sibling: Digest32,
    /// Whether the proven node is the left child at this level.
    pub is_left: bool,
}

/// Merkle inclusion proof: one sibling per level, leaf to root.
///
/// Deliberately carries no leaf index - the index bits are implied by
/// the `is_left` flags and enter the circuit as a private witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipProof {
    /// Sibling digests along the path (exactly tree depth of them).
    pub siblings: Vec<ProofNode>,
}

impl MembershipProof {
    /// Number of levels in the proof.
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

/// Hash leaf data with domain separation.
fn hash_leaf(data: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(MERKLE_LEAF_DOMAIN);
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash two child nodes with domain separation.
fn hash_nodes(left: &Digest32, right: &Digest32) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(MERKLE_NODE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaves(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("player_{i}").into_bytes()).collect()
    }

    #[test]
    fn test_root_determinism() {
        let tree1 = MembershipTree::build(&leaves(6), 3).unwrap();
        let tree2 = MembershipTree::build(&leaves(6), 3).unwrap();
        assert_eq!(tree1.root(), tree2.root());
    }

    #[test]
    fn test_different_leaves_different_root() {
        let tree1 = MembershipTree::build(&[b"a", b"b"], 2).unwrap();
        let tree2 = MembershipTree::build(&[b"a", b"c"], 2).unwrap();
        assert_ne!(tree1.root(), tree2.root());
    }

    #[test]
    fn test_padding_changes_nothing_about_real_leaves() {
        // Same roster at the same depth always commits identically,
        // regardless of how it was grown to that size.
        let data = leaves(5);
        let tree = MembershipTree::build(&data, 3).unwrap();
        let root = tree.root();

        for (i, leaf) in data.iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            assert!(MembershipTree::verify(&root, &proof, leaf));
        }
    }

    #[test]
    fn test_proof_has_exactly_depth_siblings() {
        let tree = MembershipTree::build(&leaves(3), 4).unwrap();
        let proof = tree.proof(1).unwrap();
        assert_eq!(proof.depth(), 4);
    }

    #[test]
    fn test_proof_for_padded_slot() {
        // Padding slots are provable too; the circuit rejects them via
        // the player's secret, not via this tree.
        let tree = MembershipTree::build(&leaves(3), 3).unwrap();
        assert!(tree.proof(7).is_ok());
    }

    #[test]
    fn test_invalid_index() {
        let tree = MembershipTree::build(&leaves(3), 2).unwrap();
        assert_eq!(
            tree.proof(4),
            Err(MerkleError::InvalidIndex {
                index: 4,
                capacity: 4
            })
        );
    }

    #[test]
    fn test_depth_too_small() {
        let err = MembershipTree::build(&leaves(5), 2).unwrap_err();
        assert_eq!(
            err,
            MerkleError::DepthTooSmall {
                depth: 2,
                capacity: 4,
                leaves: 5
            }
        );
    }

    #[test]
    fn test_wrong_leaf_fails_verification() {
        let data = leaves(4);
        let tree = MembershipTree::build(&data, 2).unwrap();
        let proof = tree.proof(0).unwrap();
        assert!(!MembershipTree::verify(&tree.root(), &proof, b"wrong_data"));
    }

    #[test]
    fn test_wrong_position_fails_verification() {
        let data = leaves(4);
        let tree = MembershipTree::build(&data, 2).unwrap();
        let proof = tree.proof(0).unwrap();
        // Proof for slot 0 must not validate leaf 1
        assert!(!MembershipTree::verify(&tree.root(), &proof, &data[1]));
    }

    proptest! {
        #[test]
        fn prop_every_proof_reconstructs_root(
            n in 1usize..=32,
            depth in 5usize..=7,
        ) {
            let data = leaves(n);
            let tree = MembershipTree::build(&data, depth).unwrap();
            let root = tree.root();

            for (i, leaf) in data.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                prop_assert!(MembershipTree::verify(&root, &proof, leaf));
            }
        }
    }
}

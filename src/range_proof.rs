//! C2: Range Prover / Verifier — build and verify Merkle range-proofs
//! against a root (spec §4, Data Model §3, invariant 5/6).
//!
//! The teacher verifies snap-protocol account/storage ranges against
//! `ethrex-trie`'s Merkle-Patricia Trie via `verify_range` (`peer_handler.rs`),
//! checking only that the first proof node hashes to the root — the
//! "soft verification" the spec calls out in §9 as a documented ambiguity.
//! `chain-sync` keeps that default but makes the distinction explicit via
//! `ProofVerificationMode`, and additionally supports `Strict` boundary-path
//! verification for callers that want it (SPEC_FULL.md §9a.1).

use crate::error::RangeProofError;
use ethereum_types::H256;
use sha3::{Digest, Keccak256};

fn keccak(bytes: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(bytes))
}

fn hash_pair(left: H256, right: H256) -> H256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    keccak(&buf)
}

fn leaf_hash(key: H256, value: &[u8]) -> H256 {
    let mut buf = Vec::with_capacity(32 + value.len());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(value);
    keccak(&buf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofVerificationMode {
    /// Only the root-node hash is checked (matches the teacher's behavior).
    Soft,
    /// Additionally re-derives the root from the boundary authentication
    /// paths of the first and last key in the range.
    Strict,
}

/// One sibling-hash step of a Merkle authentication path, ordered leaf-to-root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub sibling: H256,
    pub sibling_is_left: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeProof {
    /// The serialized preimage of the root hash: the concatenated left/right
    /// child hashes one level below the root (`hash_pair`'s own preimage
    /// shape), or the single leaf's `key || value` preimage when the range
    /// has exactly one entry. `Keccak256(root_node) == root` by construction.
    /// This is what the soft check inspects.
    pub root_node: Vec<u8>,
    pub first_path: Vec<PathStep>,
    pub last_path: Vec<PathStep>,
}

/// Builds the full binary Merkle tree over `(keys, values)` (sorted,
/// deduplicated by `keys`) and returns every level, leaves first.
fn build_tree(keys: &[H256], values: &[&[u8]]) -> Vec<Vec<H256>> {
    let mut level: Vec<H256> = keys
        .iter()
        .zip(values.iter())
        .map(|(k, v)| leaf_hash(*k, v))
        .collect();
    let mut levels = vec![level.clone()];
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let combined = if pair.len() == 2 {
                hash_pair(pair[0], pair[1])
            } else {
                // Odd node out: promote unchanged (Bitcoin-style duplication
                // is avoided so a single-leaf proof doesn't self-pair).
                pair[0]
            };
            next.push(combined);
        }
        levels.push(next.clone());
        level = next;
    }
    levels
}

fn path_for(levels: &[Vec<H256>], mut index: usize) -> Vec<PathStep> {
    let mut path = Vec::new();
    for level in &levels[..levels.len().saturating_sub(1)] {
        let is_right = index % 2 == 1;
        let sibling_index = if is_right { index - 1 } else { index + 1 };
        if let Some(&sibling) = level.get(sibling_index) {
            path.push(PathStep {
                sibling,
                sibling_is_left: is_right,
            });
        }
        index /= 2;
    }
    path
}

fn replay_path(leaf: H256, path: &[PathStep]) -> H256 {
    let mut acc = leaf;
    for step in path {
        acc = if step.sibling_is_left {
            hash_pair(step.sibling, acc)
        } else {
            hash_pair(acc, step.sibling)
        };
    }
    acc
}

pub struct RangeProver;

impl RangeProver {
    /// Computes the Merkle root committing to the full sorted `(keys,
    /// values)` set — the analogue of a trie's state root for this
    /// simplified model.
    pub fn compute_root(keys: &[H256], values: &[&[u8]]) -> Result<H256, RangeProofError> {
        if keys.is_empty() {
            return Err(RangeProofError::EmptyRange);
        }
        if keys.len() != values.len() {
            return Err(RangeProofError::LengthMismatch);
        }
        let levels = build_tree(keys, values);
        Ok(*levels.last().and_then(|l| l.first()).unwrap_or(&H256::zero()))
    }

    /// Builds a range proof for `[keys, values]` against `root`
    /// (spec's `CreateProof(keys, values, R)`).
    pub fn create_proof(
        keys: &[H256],
        values: &[&[u8]],
        root: H256,
    ) -> Result<RangeProof, RangeProofError> {
        if keys.is_empty() {
            return Err(RangeProofError::EmptyRange);
        }
        if keys.len() != values.len() {
            return Err(RangeProofError::LengthMismatch);
        }
        let levels = build_tree(keys, values);
        let computed_root = *levels.last().and_then(|l| l.first()).unwrap_or(&H256::zero());
        if computed_root != root {
            return Err(RangeProofError::VerificationFailed);
        }
        let root_node = if keys.len() == 1 {
            let mut buf = Vec::with_capacity(32 + values[0].len());
            buf.extend_from_slice(keys[0].as_bytes());
            buf.extend_from_slice(values[0]);
            buf
        } else {
            // Reducing any level of size > 1 by halving always passes
            // through a size-2 level immediately before the single-element
            // root level, so `levels[levels.len() - 2]` is exactly the
            // root's two children.
            let pre_root = &levels[levels.len() - 2];
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(pre_root[0].as_bytes());
            buf[32..].copy_from_slice(pre_root[1].as_bytes());
            buf.to_vec()
        };
        Ok(RangeProof {
            root_node,
            first_path: path_for(&levels, 0),
            last_path: path_for(&levels, keys.len() - 1),
        })
    }

    /// `Verify(R, CreateProof(keys, values, R))`.
    pub fn verify(
        root: H256,
        keys: &[H256],
        values: &[&[u8]],
        proof: &RangeProof,
        mode: ProofVerificationMode,
    ) -> Result<bool, RangeProofError> {
        if keys.is_empty() || keys.len() != values.len() {
            return Err(RangeProofError::LengthMismatch);
        }
        let soft_ok = keccak(&proof.root_node) == root;
        if mode == ProofVerificationMode::Soft {
            return Ok(soft_ok);
        }
        if !soft_ok {
            return Ok(false);
        }
        let first_leaf = leaf_hash(keys[0], values[0]);
        let last_leaf = leaf_hash(keys[keys.len() - 1], values[values.len() - 1]);
        Ok(replay_path(first_leaf, &proof.first_path) == root
            && replay_path(last_leaf, &proof.last_path) == root)
    }
}

/// Merges accounts produced by `n` key-space sub-ranges into the original,
/// sorted, deduplicated-by-hash set (invariant 6).
pub fn merge_sorted_dedup<T: Clone, K: Ord + Copy>(
    ranges: Vec<Vec<T>>,
    key_of: impl Fn(&T) -> K,
) -> Vec<T> {
    let mut merged: Vec<T> = ranges.into_iter().flatten().collect();
    merged.sort_by_key(|item| key_of(item));
    merged.dedup_by_key(|item| key_of(item));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: u64) -> Vec<H256> {
        (0..n).map(H256::from_low_u64_be).collect()
    }

    #[test]
    fn round_trip_succeeds_against_own_root() {
        let ks = keys(8);
        let vals: Vec<&[u8]> = (0..8).map(|_| b"v".as_slice()).collect();
        let root = RangeProver::compute_root(&ks, &vals).unwrap();
        let proof = RangeProver::create_proof(&ks, &vals, root).unwrap();
        assert!(RangeProver::verify(root, &ks, &vals, &proof, ProofVerificationMode::Soft).unwrap());
        assert!(
            RangeProver::verify(root, &ks, &vals, &proof, ProofVerificationMode::Strict).unwrap()
        );
    }

    #[test]
    fn round_trip_succeeds_for_a_single_entry_range() {
        let ks = keys(1);
        let vals: Vec<&[u8]> = vec![b"only".as_slice()];
        let root = RangeProver::compute_root(&ks, &vals).unwrap();
        let proof = RangeProver::create_proof(&ks, &vals, root).unwrap();
        assert!(RangeProver::verify(root, &ks, &vals, &proof, ProofVerificationMode::Soft).unwrap());
        assert!(
            RangeProver::verify(root, &ks, &vals, &proof, ProofVerificationMode::Strict).unwrap()
        );
    }

    #[test]
    fn verification_fails_against_a_different_root() {
        let ks = keys(4);
        let vals: Vec<&[u8]> = (0..4).map(|_| b"x".as_slice()).collect();
        let root = RangeProver::compute_root(&ks, &vals).unwrap();
        let proof = RangeProver::create_proof(&ks, &vals, root).unwrap();
        let other_root = H256::repeat_byte(0x42);
        assert!(
            !RangeProver::verify(other_root, &ks, &vals, &proof, ProofVerificationMode::Soft)
                .unwrap()
        );
    }

    #[test]
    fn odd_number_of_leaves_is_handled() {
        let ks = keys(5);
        let vals: Vec<&[u8]> = (0..5).map(|_| b"v".as_slice()).collect();
        let root = RangeProver::compute_root(&ks, &vals).unwrap();
        let proof = RangeProver::create_proof(&ks, &vals, root).unwrap();
        assert!(
            RangeProver::verify(root, &ks, &vals, &proof, ProofVerificationMode::Strict).unwrap()
        );
    }

    #[test]
    fn merge_is_idempotent_over_split_ranges() {
        let full: Vec<(H256, u64)> = keys(10).into_iter().map(|k| (k, 1)).collect();
        // Split into 3 sub-ranges, including an overlap, then merge back.
        let sub_a = full[0..4].to_vec();
        let sub_b = full[3..7].to_vec();
        let sub_c = full[7..10].to_vec();
        let merged = merge_sorted_dedup(vec![sub_a, sub_b, sub_c], |(k, _)| *k);
        assert_eq!(merged, full);
    }
}

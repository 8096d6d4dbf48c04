//! Merkle hash trees over graph elements: the plain SHA-256 tree and the
//! arithmetic-aggregation tree layered on top of it.
//!
//! Proofs are self-contained: recomputation needs only the element and the
//! sibling chain, never the tree.

pub mod aa;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use ark_bn254::Fr;
use primitives::digest::element_hash;
use primitives::GraphElement;

pub use aa::{AaMht, AaProof, DeltaKind};

/// Failures raised while producing or recomputing proofs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("element not found in tree")]
    ElementNotFound,
    #[error("element has been deleted")]
    Deleted,
    #[error("sub-tree hash chain does not recompute to the claimed root")]
    SubrootMismatch,
    #[error("malformed proof: {0}")]
    MalformedProof(String),
}

/// Where the sibling sits relative to the running hash. `SelfPair` marks
/// the odd-tail case where a node pairs with itself.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
    #[serde(rename = "self")]
    SelfPair,
}

/// One step of a sibling chain, leaf layer upward.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct ChainStep {
    pub sibling: String,
    pub position: Position,
}

/// Self-contained membership proof for one leaf.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MhtProof {
    pub element: GraphElement,
    pub chain: Vec<ChainStep>,
    pub root: String,
}

/// Binary SHA-256 Merkle tree. All layers are retained so proofs come out
/// in O(log n).
#[derive(Clone, Debug)]
pub struct Mht {
    leaves: Vec<GraphElement>,
    layers: Vec<Vec<[u8; 32]>>,
    index: HashMap<[u8; 32], usize>,
    root: [u8; 32],
}

fn pair_hash(l: &[u8; 32], r: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(l);
    hasher.update(r);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

impl Mht {
    /// Build the tree bottom-up. Pairs are `(2i, 2i+1)`; an odd tail pairs
    /// with itself. An empty leaf list yields the all-zero root.
    pub fn build(leaves: Vec<GraphElement>) -> Self {
        let hashes: Vec<[u8; 32]> = leaves.iter().map(element_hash).collect();

        let mut index = HashMap::with_capacity(hashes.len());
        for (i, h) in hashes.iter().enumerate() {
            // Duplicate leaves keep their first index.
            index.entry(*h).or_insert(i);
        }

        let mut layers = vec![hashes];
        while layers.last().map(|l| l.len() > 1).unwrap_or(false) {
            let cur = layers.last().expect("non-empty layer stack");
            let mut next = Vec::with_capacity(cur.len().div_ceil(2));
            for pair in cur.chunks(2) {
                let l = &pair[0];
                let r = pair.get(1).unwrap_or(l);
                next.push(pair_hash(l, r));
            }
            layers.push(next);
        }

        let root = layers
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or([0u8; 32]);

        Mht {
            leaves,
            layers,
            index,
            root,
        }
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn contains(&self, e: &GraphElement) -> bool {
        self.index.contains_key(&element_hash(e))
    }

    /// Root as lowercase 64-hex.
    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }

    /// Root digest reduced into the scalar field.
    pub fn root_fr(&self) -> Fr {
        use ark_ff::PrimeField;
        Fr::from_be_bytes_mod_order(&self.root)
    }

    /// Sibling chain for `e`, leaf layer upward.
    pub fn proof(&self, e: &GraphElement) -> Result<MhtProof, ProofError> {
        let mut idx = *self
            .index
            .get(&element_hash(e))
            .ok_or(ProofError::ElementNotFound)?;

        let mut chain = Vec::with_capacity(self.layers.len());
        for layer in &self.layers[..self.layers.len().saturating_sub(1)] {
            let is_right = idx % 2 == 1;
            let sibling_idx = if is_right { idx - 1 } else { idx + 1 };
            let (sibling, position) = if sibling_idx >= layer.len() {
                (layer[idx], Position::SelfPair)
            } else if is_right {
                (layer[sibling_idx], Position::Left)
            } else {
                (layer[sibling_idx], Position::Right)
            };
            chain.push(ChainStep {
                sibling: hex::encode(sibling),
                position,
            });
            idx /= 2;
        }

        Ok(MhtProof {
            element: *e,
            chain,
            root: self.root_hex(),
        })
    }

    /// Rebuild the root from a proof's element and chain alone.
    pub fn recompute(proof: &MhtProof) -> Result<String, ProofError> {
        let mut current = element_hash(&proof.element);
        for step in &proof.chain {
            let raw = hex::decode(&step.sibling)
                .map_err(|e| ProofError::MalformedProof(format!("sibling hex: {e}")))?;
            let sibling: [u8; 32] = raw.try_into().map_err(|v: Vec<u8>| {
                ProofError::MalformedProof(format!("sibling length {} != 32", v.len()))
            })?;
            current = match step.position {
                Position::Left => pair_hash(&sibling, &current),
                Position::Right => pair_hash(&current, &sibling),
                Position::SelfPair => pair_hash(&current, &current),
            };
        }
        Ok(hex::encode(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elements(n: i64) -> Vec<GraphElement> {
        (1..=n).map(GraphElement::node).collect()
    }

    #[test]
    fn every_leaf_recomputes_to_the_root() {
        for n in [1i64, 2, 3, 4, 5, 8, 13] {
            let tree = Mht::build(elements(n));
            for e in elements(n) {
                let proof = tree.proof(&e).unwrap();
                assert_eq!(Mht::recompute(&proof).unwrap(), tree.root_hex(), "n = {n}");
            }
        }
    }

    #[test]
    fn odd_tail_pairs_with_itself() {
        let tree = Mht::build(elements(3));
        let proof = tree.proof(&GraphElement::node(3)).unwrap();
        assert!(proof
            .chain
            .iter()
            .any(|s| s.position == Position::SelfPair));
        assert_eq!(Mht::recompute(&proof).unwrap(), tree.root_hex());
    }

    #[test]
    fn tampered_element_changes_the_recomputed_root() {
        let tree = Mht::build(elements(4));
        let mut proof = tree.proof(&GraphElement::node(2)).unwrap();
        proof.element = GraphElement::node(-2);
        assert_ne!(Mht::recompute(&proof).unwrap(), tree.root_hex());
    }

    #[test]
    fn missing_element_is_rejected() {
        let tree = Mht::build(elements(4));
        assert_eq!(
            tree.proof(&GraphElement::node(99)).unwrap_err(),
            ProofError::ElementNotFound
        );
    }

    #[test]
    fn malformed_sibling_is_rejected() {
        let tree = Mht::build(elements(4));
        let mut proof = tree.proof(&GraphElement::node(1)).unwrap();
        proof.chain[0].sibling = "abcd".into();
        assert!(matches!(
            Mht::recompute(&proof),
            Err(ProofError::MalformedProof(_))
        ));
        proof.chain[0].sibling = "zz".into();
        assert!(matches!(
            Mht::recompute(&proof),
            Err(ProofError::MalformedProof(_))
        ));
    }

    #[test]
    fn edges_and_nodes_share_one_tree() {
        let leaves = vec![
            GraphElement::node(1),
            GraphElement::node(2),
            GraphElement::edge(1, 2),
        ];
        let tree = Mht::build(leaves.clone());
        for e in leaves {
            let proof = tree.proof(&e).unwrap();
            assert_eq!(Mht::recompute(&proof).unwrap(), tree.root_hex());
        }
    }

    #[test]
    fn proof_survives_serialization() {
        let tree = Mht::build(elements(5));
        let proof = tree.proof(&GraphElement::node(4)).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        assert!(json.contains("\"position\""));
        let back: MhtProof = serde_json::from_str(&json).unwrap();
        assert_eq!(Mht::recompute(&back).unwrap(), tree.root_hex());
    }
}

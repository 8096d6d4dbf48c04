//! Arithmetic-aggregation Merkle tree: an initial tree plus an append-only
//! history of tagged delta trees whose roots sum into a single aggregate
//! in the scalar field.

use ark_bn254::Fr;
use ark_ff::Zero;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use primitives::digest::{fr_to_hex, hex_to_fr};
use primitives::GraphElement;

use crate::{ChainStep, Mht, MhtProof, ProofError};

/// Tag on a history entry.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum DeltaKind {
    Add,
    Del,
}

#[derive(Clone, Debug)]
struct Delta {
    kind: DeltaKind,
    tree: Mht,
}

/// Aggregate tree with root `R = (R_init + Σ R_add − Σ R_del) mod q`.
///
/// The running addition/deletion sums are maintained at mutation time, so
/// every proof in a round reuses them instead of rescanning history.
#[derive(Clone, Debug)]
pub struct AaMht {
    initial: Mht,
    history: Vec<Delta>,
    add_sum: Fr,
    del_sum: Fr,
    root: Fr,
}

/// Membership proof carrying everything needed to recompute the aggregate:
/// the sibling chain inside one sub-tree plus the summed delta roots.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct AaProof {
    pub element: GraphElement,
    pub sub_chain: Vec<ChainStep>,
    pub sub_root: String,
    pub initial_root: String,
    pub addition_root: String,
    pub deletion_root: String,
    pub root: String,
}

impl AaMht {
    pub fn new(initial: Vec<GraphElement>) -> Self {
        let initial = Mht::build(initial);
        let root = initial.root_fr();
        AaMht {
            initial,
            history: Vec::new(),
            add_sum: Fr::zero(),
            del_sum: Fr::zero(),
            root,
        }
    }

    fn refresh_root(&mut self) {
        self.root = self.initial.root_fr() + self.add_sum - self.del_sum;
    }

    /// Append an addition delta; returns the delta tree's root scalar.
    pub fn add(&mut self, batch: Vec<GraphElement>) -> Fr {
        let tree = Mht::build(batch);
        let r = tree.root_fr();
        self.add_sum += r;
        self.history.push(Delta {
            kind: DeltaKind::Add,
            tree,
        });
        self.refresh_root();
        r
    }

    /// Append a deletion delta; returns the delta tree's root scalar.
    pub fn del(&mut self, batch: Vec<GraphElement>) -> Fr {
        let tree = Mht::build(batch);
        let r = tree.root_fr();
        self.del_sum += r;
        self.history.push(Delta {
            kind: DeltaKind::Del,
            tree,
        });
        self.refresh_root();
        r
    }

    pub fn root_fr(&self) -> Fr {
        self.root
    }

    pub fn root_hex(&self) -> String {
        fr_to_hex(&self.root)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Prove membership of `e` against its most recent occurrence.
    ///
    /// History is scanned newest-first: a deletion delta supersedes every
    /// earlier addition, a later re-addition supersedes the deletion, and
    /// the initial tree is the final fallback.
    pub fn proof(&self, e: &GraphElement) -> Result<AaProof, ProofError> {
        let mut sub = None;
        for delta in self.history.iter().rev() {
            if delta.tree.contains(e) {
                match delta.kind {
                    DeltaKind::Del => return Err(ProofError::Deleted),
                    DeltaKind::Add => {
                        sub = Some(delta.tree.proof(e)?);
                        break;
                    }
                }
            }
        }
        let sub = match sub {
            Some(p) => p,
            None => self.initial.proof(e)?,
        };

        Ok(AaProof {
            element: *e,
            sub_chain: sub.chain,
            sub_root: sub.root,
            initial_root: fr_to_hex(&self.initial.root_fr()),
            addition_root: fr_to_hex(&self.add_sum),
            deletion_root: fr_to_hex(&self.del_sum),
            root: self.root_hex(),
        })
    }

    /// Recompute the aggregate root a proof claims.
    ///
    /// First the sub-tree chain is replayed from the element; a mismatch
    /// against the claimed sub-root fails closed before any field
    /// arithmetic. Roots are compared as integers so padding differences
    /// cannot mask or fake a mismatch. The caller compares the returned
    /// hex against the proof's aggregate root and the signed root.
    pub fn verify_aa(proof: &AaProof) -> Result<String, ProofError> {
        let recomputed = Mht::recompute(&MhtProof {
            element: proof.element,
            chain: proof.sub_chain.clone(),
            root: proof.sub_root.clone(),
        })?;

        let claimed = parse_hex_uint(&proof.sub_root, "sub_root")?;
        let got = parse_hex_uint(&recomputed, "recomputed sub_root")?;
        if got != claimed {
            return Err(ProofError::SubrootMismatch);
        }

        let initial = parse_root(&proof.initial_root, "initial_root")?;
        let addition = parse_root(&proof.addition_root, "addition_root")?;
        let deletion = parse_root(&proof.deletion_root, "deletion_root")?;

        Ok(fr_to_hex(&(initial + addition - deletion)))
    }
}

fn parse_hex_uint(s: &str, field: &str) -> Result<BigUint, ProofError> {
    BigUint::parse_bytes(s.as_bytes(), 16)
        .ok_or_else(|| ProofError::MalformedProof(format!("{field} is not hex")))
}

fn parse_root(s: &str, field: &str) -> Result<Fr, ProofError> {
    hex_to_fr(s).map_err(|e| ProofError::MalformedProof(format!("{field}: {e}")))
}

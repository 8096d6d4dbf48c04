//! Time-associated decoy mapping: a deterministic synthetic subgraph
//! derived from a round timestamp.
//!
//! The data owner and the request party each compute the set locally from
//! the round's timestamp and must agree bit-for-bit, so all randomness is
//! drawn from a PRNG seeded by SHA-256 of the token. Node IDs are negative
//! and therefore disjoint from any real dataset.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::digest::sha256;
use crate::{edge, EdgeId, GraphElement, NodeId, Timestamp};

/// Synthetic node/edge set bound to one timestamp.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoySet {
    pub nodes: BTreeSet<NodeId>,
    pub edges: BTreeSet<EdgeId>,
}

impl DecoySet {
    /// All members as graph elements, nodes first, in canonical set order.
    pub fn elements(&self) -> Vec<GraphElement> {
        self.nodes
            .iter()
            .map(|&n| GraphElement::node(n))
            .chain(self.edges.iter().map(|&(u, v)| GraphElement::edge(u, v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Map a timestamp to exactly `k` synthetic edges (and their endpoints).
///
/// Pure function of `(ts, k)`: the seed is the first 8 bytes of
/// SHA-256(ts), the ID base is seed-derived, and pairing walks both
/// shuffled endpoint lists round-robin with a full-scan fallback.
pub fn mapping_psi(ts: &Timestamp, k: usize) -> DecoySet {
    let digest = sha256(ts.as_str().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let seed = u64::from_be_bytes(prefix);
    let mut rng = ChaCha20Rng::seed_from_u64(seed);

    let base = (seed % 1_000_000 + 10_000) as i64;

    let mut from_nodes = BTreeSet::new();
    let mut to_nodes = BTreeSet::new();
    for i in 0..k as i64 {
        let r1: i64 = rng.gen_range(1..=10_000);
        let r2: i64 = rng.gen_range(1..=10_000);
        from_nodes.insert(-(base + r1 + i));
        // The extra offset keeps the "to" range disjoint from "from".
        to_nodes.insert(-(base + r2 + i + 100_000));
    }

    let nodes: BTreeSet<NodeId> = from_nodes.union(&to_nodes).copied().collect();

    let mut from_list: Vec<NodeId> = from_nodes.into_iter().collect();
    let mut to_list: Vec<NodeId> = to_nodes.into_iter().collect();
    from_list.shuffle(&mut rng);
    to_list.shuffle(&mut rng);

    let mut edges: BTreeSet<EdgeId> = BTreeSet::new();
    if k > 0 {
        let (mut i, mut j) = (0usize, 0usize);
        while edges.len() < k {
            let (u, v) = (from_list[i], to_list[j]);
            if u != v {
                edges.insert(edge(u, v));
            }
            i = (i + 1) % from_list.len();
            j = (j + 1) % to_list.len();
            if edges.len() < k && i == 0 && j == 0 {
                // Cycled both lists without reaching k distinct pairs:
                // scan every combination deterministically.
                'scan: for &u in &from_list {
                    for &v in &to_list {
                        if u != v {
                            edges.insert(edge(u, v));
                        }
                        if edges.len() == k {
                            break 'scan;
                        }
                    }
                }
                break;
            }
        }
    }

    DecoySet { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(digits: &str) -> Timestamp {
        Timestamp::from_digits(digits)
    }

    #[test]
    fn mapping_is_a_pure_function() {
        let t = ts("20240101000000000000");
        assert_eq!(mapping_psi(&t, 20), mapping_psi(&t, 20));
    }

    #[test]
    fn mapping_yields_exactly_k_edges() {
        for k in [1usize, 5, 20, 64] {
            let s = mapping_psi(&ts("20240101000000000001"), k);
            assert_eq!(s.edges.len(), k, "k = {k}");
        }
    }

    #[test]
    fn distinct_timestamps_yield_distinct_sets() {
        let a = mapping_psi(&ts("20240101000000000000"), 20);
        let b = mapping_psi(&ts("20240101000000000002"), 20);
        assert_ne!(a, b);
    }

    #[test]
    fn decoy_ids_are_negative() {
        let s = mapping_psi(&ts("20240101000000000003"), 20);
        assert!(s.nodes.iter().all(|&n| n < 0));
        assert!(s.edges.iter().all(|&(u, v)| u < 0 && v < 0 && u <= v));
    }

    #[test]
    fn edge_endpoints_come_from_the_node_set() {
        let s = mapping_psi(&ts("20240101000000000004"), 20);
        for (u, v) in &s.edges {
            assert!(s.nodes.contains(u));
            assert!(s.nodes.contains(v));
        }
    }

    #[test]
    fn zero_k_is_empty() {
        let s = mapping_psi(&ts("20240101000000000005"), 0);
        assert!(s.is_empty());
    }
}

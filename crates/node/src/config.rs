//! Dataset registry, built-in query-pattern instances, and protocol
//! defaults.

use std::collections::BTreeSet;

use primitives::{edge, EdgeId, NodeId};

/// Edge-list files the dataset index selects from, in index order.
pub const DATASET_NAMES: [&str; 6] = [
    "snap-Email-Enron.txt",
    "snap-com-dblp.txt",
    "snap-com-youtube.txt",
    "snap-cit-Patents.txt",
    "snap-wiki-talk-temporal.txt",
    "synthetic_graph_1M_nodes.txt",
];

pub mod defaults {
    pub const DATASET: usize = 0;
    pub const INITIAL_RATIO: f64 = 1.0;
    pub const BATCH_SIZE: usize = 10_000;
    /// Decoy edges per round (|S|).
    pub const TS_SIZE: usize = 20;
    pub const ROUNDS: usize = 67;
    pub const QUERY_INTERVAL: usize = 1;
    pub const QUERY: &str = "3n3e";
}

type Instance = (&'static [NodeId], &'static [(NodeId, NodeId)]);

/// Known ground-truth query instances per dataset. A key that is not
/// listed here falls back to the random subgraph sampler.
fn instance(dataset: &str, key: &str) -> Option<Instance> {
    let found: Instance = match (dataset, key) {
        ("snap-Email-Enron.txt", "3n3e") => (&[1, 3, 4], &[(1, 3), (1, 4), (3, 4)]),
        ("snap-Email-Enron.txt", "5n4e") => {
            (&[1, 3, 4, 6, 8552], &[(1, 3), (1, 4), (3, 6), (4, 8552)])
        }
        ("snap-Email-Enron.txt", "5n6e") => (
            &[1, 3, 4, 5, 56],
            &[(1, 3), (1, 4), (1, 5), (1, 56), (3, 4), (5, 56)],
        ),
        ("snap-com-dblp.txt", "3n3e") => (&[0, 1, 2], &[(0, 1), (0, 2), (1, 2)]),
        ("snap-com-dblp.txt", "5n4e") => (
            &[0, 1, 2, 6786, 17411],
            &[(0, 1), (0, 2), (1, 17411), (2, 6786)],
        ),
        ("snap-com-youtube.txt", "3n3e") => (&[1, 2, 4], &[(1, 2), (1, 4), (2, 4)]),
        _ => return None,
    };
    Some(found)
}

/// Query-pattern lookup, canonicalized into owned sets.
pub fn pattern(dataset: &str, key: &str) -> Option<(BTreeSet<NodeId>, BTreeSet<EdgeId>)> {
    let (nodes, edges) = instance(dataset, key)?;
    Some((
        nodes.iter().copied().collect(),
        edges.iter().map(|&(u, v)| edge(u, v)).collect(),
    ))
}

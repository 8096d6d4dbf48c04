//! Graph loading, sampling, and update generation: the data plumbing
//! around the verification engine.
//!
//! Input files are whitespace-separated edge lists, one `u v [ts]` line
//! per edge; `#` and `%` lines are comments; self-loops are dropped and
//! edges are unordered.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use primitives::decoy::DecoySet;
use primitives::{edge, EdgeId, GraphElement, NodeId};

/// In-memory node/edge sets shared by the data owner and cloud server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Graph {
    pub nodes: BTreeSet<NodeId>,
    pub edges: BTreeSet<EdgeId>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// All elements in canonical order (node elements sort before edge
    /// elements, so the chained iterators are already sorted).
    pub fn elements(&self) -> Vec<GraphElement> {
        self.nodes
            .iter()
            .map(|&n| GraphElement::node(n))
            .chain(self.edges.iter().map(|&(u, v)| GraphElement::edge(u, v)))
            .collect()
    }

    /// Sorted, deduplicated elements of the graph united with a decoy set.
    pub fn elements_with(&self, extra: &DecoySet) -> Vec<GraphElement> {
        self.nodes
            .union(&extra.nodes)
            .map(|&n| GraphElement::node(n))
            .chain(
                self.edges
                    .union(&extra.edges)
                    .map(|&(u, v)| GraphElement::edge(u, v)),
            )
            .collect()
    }
}

/// Load a full edge-list file.
pub fn load_graph(path: &Path) -> io::Result<Graph> {
    let file = File::open(path)?;
    let mut g = Graph::default();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.starts_with('#') || line.starts_with('%') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(u), Some(v)) = (parts.next(), parts.next()) else {
            continue;
        };
        let (Ok(u), Ok(v)) = (u.parse::<NodeId>(), v.parse::<NodeId>()) else {
            continue;
        };
        if u == v {
            continue;
        }
        g.nodes.insert(u);
        g.nodes.insert(v);
        g.edges.insert(edge(u, v));
    }
    Ok(g)
}

/// Load a temporal edge list split into an initial graph plus batched
/// update stream. Each edge keeps its earliest timestamp (third column,
/// or the line index when absent); the first `initial_ratio` of the
/// time-ordered edges form the initial graph.
pub fn load_stream(
    path: &Path,
    initial_ratio: f64,
    batch_size: usize,
) -> io::Result<(Graph, Vec<BTreeSet<EdgeId>>)> {
    let file = File::open(path)?;
    let mut earliest: BTreeMap<EdgeId, i64> = BTreeMap::new();
    let mut line_idx: i64 = 0;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.starts_with('#') || line.starts_with('%') {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (u, v, ts) = match parts.as_slice() {
            [u, v, ts, ..] => match (u.parse(), v.parse(), ts.parse()) {
                (Ok(u), Ok(v), Ok(ts)) => (u, v, ts),
                _ => continue,
            },
            [u, v] => match (u.parse(), v.parse()) {
                (Ok(u), Ok(v)) => (u, v, line_idx),
                _ => continue,
            },
            _ => continue,
        };
        line_idx += 1;
        if u == v {
            continue;
        }
        let e = edge(u, v);
        earliest
            .entry(e)
            .and_modify(|t| *t = (*t).min(ts))
            .or_insert(ts);
    }

    let mut ordered: Vec<(i64, EdgeId)> = earliest.into_iter().map(|(e, t)| (t, e)).collect();
    ordered.sort();
    let n_edges = ordered.len();

    let mut init_size = (n_edges as f64 * initial_ratio) as usize;
    if init_size == 0 && n_edges > 0 {
        init_size = n_edges.min(100);
    }

    let mut g = Graph::default();
    for &(_, (u, v)) in &ordered[..init_size] {
        g.nodes.insert(u);
        g.nodes.insert(v);
        g.edges.insert((u, v));
    }

    let batches = ordered[init_size..]
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.iter().map(|&(_, e)| e).collect::<BTreeSet<EdgeId>>())
        .filter(|b| !b.is_empty())
        .collect();

    Ok((g, batches))
}

/// Undirected adjacency, including isolated nodes.
pub fn adjacency_list(g: &Graph) -> BTreeMap<NodeId, BTreeSet<NodeId>> {
    let mut adj: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    for &(u, v) in &g.edges {
        adj.entry(u).or_default().insert(v);
        adj.entry(v).or_default().insert(u);
    }
    for &n in &g.nodes {
        adj.entry(n).or_default();
    }
    adj
}

/// Random-walk sample of roughly `n_samples` nodes, always containing the
/// locked query instance, plus every induced edge.
pub fn sample_graph<R: Rng + ?Sized>(
    adj: &BTreeMap<NodeId, BTreeSet<NodeId>>,
    n_samples: usize,
    locked_nodes: &BTreeSet<NodeId>,
    locked_edges: &BTreeSet<EdgeId>,
    rng: &mut R,
) -> Graph {
    let mut sampled: BTreeSet<NodeId> = locked_nodes.clone();
    for &(u, v) in locked_edges {
        sampled.insert(u);
        sampled.insert(v);
    }
    let mut sequence: Vec<NodeId> = sampled.iter().copied().collect();

    let pool: Vec<NodeId> = adj.keys().copied().collect();
    if sequence.is_empty() {
        let Some(&start) = pool.as_slice().choose(rng) else {
            return Graph::default();
        };
        sampled.insert(start);
        sequence.push(start);
    }

    let mut cur = *sequence.last().expect("sequence is non-empty");
    let mut stalls = 0usize;
    while sampled.len() < n_samples {
        let pending: Vec<NodeId> = adj
            .get(&cur)
            .map(|ns| ns.iter().copied().filter(|n| !sampled.contains(n)).collect())
            .unwrap_or_default();
        if let Some(&next) = pending.as_slice().choose(rng) {
            sampled.insert(next);
            sequence.push(next);
            cur = next;
            stalls = 0;
        } else {
            cur = *sequence.as_slice().choose(rng).expect("sequence is non-empty");
            stalls += 1;
            // The walk's component is exhausted.
            if sampled.len() >= pool.len() || stalls > pool.len() {
                break;
            }
        }
    }

    let mut edges = locked_edges.clone();
    for &u in &sampled {
        if let Some(ns) = adj.get(&u) {
            for &v in ns {
                if u < v && sampled.contains(&v) {
                    edges.insert((u, v));
                }
            }
        }
    }

    Graph {
        nodes: sampled,
        edges,
    }
}

/// Batch update direction.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum UpdateKind {
    Addition,
    Deletion,
}

/// One round's worth of node/edge changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateBatch {
    pub kind: UpdateKind,
    pub nodes: BTreeSet<NodeId>,
    pub edges: BTreeSet<EdgeId>,
}

impl UpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Elements in canonical order.
    pub fn elements(&self) -> Vec<GraphElement> {
        self.nodes
            .iter()
            .map(|&n| GraphElement::node(n))
            .chain(self.edges.iter().map(|&(u, v)| GraphElement::edge(u, v)))
            .collect()
    }

    /// Addition batch from a temporal-stream slice; nodes are the
    /// endpoints the graph has not seen yet.
    pub fn from_stream(batch: &BTreeSet<EdgeId>, g: &Graph) -> Self {
        let nodes = batch
            .iter()
            .flat_map(|&(u, v)| [u, v])
            .filter(|n| !g.nodes.contains(n))
            .collect();
        UpdateBatch {
            kind: UpdateKind::Addition,
            nodes,
            edges: batch.clone(),
        }
    }
}

/// Generate a synthetic update batch.
///
/// Additions attach fresh nodes (above the current maximum ID) to random
/// existing nodes. Deletions sample edges that avoid the locked query
/// elements and carry along any node the removal orphans.
pub fn gen_update<R: Rng + ?Sized>(
    g: &Graph,
    n_edges: usize,
    kind: UpdateKind,
    locked_nodes: &BTreeSet<NodeId>,
    locked_edges: &BTreeSet<EdgeId>,
    rng: &mut R,
) -> UpdateBatch {
    match kind {
        UpdateKind::Addition => {
            let max_node = g.nodes.iter().max().copied().unwrap_or(0);
            let active: Vec<NodeId> = g.nodes.iter().copied().collect();
            let mut nodes = BTreeSet::new();
            let mut edges = BTreeSet::new();
            let mut new_node = max_node + 1;
            for _ in 0..n_edges {
                nodes.insert(new_node);
                if let Some(&anchor) = active.as_slice().choose(rng) {
                    edges.insert(edge(new_node, anchor));
                }
                new_node += 1;
            }
            UpdateBatch { kind, nodes, edges }
        }
        UpdateKind::Deletion => {
            let valid: Vec<EdgeId> = g
                .edges
                .iter()
                .filter(|&&(u, v)| {
                    !locked_nodes.contains(&u)
                        && !locked_nodes.contains(&v)
                        && !locked_edges.contains(&(u, v))
                })
                .copied()
                .collect();
            let edges: BTreeSet<EdgeId> = valid
                .as_slice()
                .choose_multiple(rng, n_edges.min(valid.len()))
                .copied()
                .collect();

            let remaining: BTreeSet<EdgeId> = g.edges.difference(&edges).copied().collect();
            let active: BTreeSet<NodeId> =
                remaining.iter().flat_map(|&(u, v)| [u, v]).collect();
            let nodes: BTreeSet<NodeId> = edges
                .iter()
                .flat_map(|&(u, v)| [u, v])
                .filter(|n| !active.contains(n))
                .collect();
            UpdateBatch { kind, nodes, edges }
        }
    }
}

/// Random connected-ish query instance: `n_edges` sampled edges and their
/// endpoints. `None` when the graph has fewer edges than requested.
pub fn gen_subgraph<R: Rng + ?Sized>(
    edges: &BTreeSet<EdgeId>,
    n_edges: usize,
    rng: &mut R,
) -> Option<(BTreeSet<NodeId>, BTreeSet<EdgeId>)> {
    if edges.len() < n_edges {
        return None;
    }
    let pool: Vec<EdgeId> = edges.iter().copied().collect();
    let sampled: BTreeSet<EdgeId> = pool
        .as_slice()
        .choose_multiple(rng, n_edges)
        .copied()
        .collect();
    let nodes = sampled.iter().flat_map(|&(u, v)| [u, v]).collect();
    Some((nodes, sampled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn load_graph_skips_comments_and_self_loops() {
        let f = write_file("# comment\n% comment\n1 2\n2 1\n3 3\n2 3 99\nbad line\n");
        let g = load_graph(f.path()).unwrap();
        assert_eq!(g.nodes, BTreeSet::from([1, 2, 3]));
        assert_eq!(g.edges, BTreeSet::from([(1, 2), (2, 3)]));
    }

    #[test]
    fn load_stream_splits_initial_and_batches() {
        let f = write_file("1 2 10\n3 4 20\n5 6 30\n7 8 40\n");
        let (g, batches) = load_stream(f.path(), 0.5, 1).unwrap();
        assert_eq!(g.edges, BTreeSet::from([(1, 2), (3, 4)]));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], BTreeSet::from([(5, 6)]));
        assert_eq!(batches[1], BTreeSet::from([(7, 8)]));
    }

    #[test]
    fn load_stream_keeps_earliest_timestamp() {
        let f = write_file("1 2 50\n3 4 10\n2 1 5\n");
        let (g, _) = load_stream(f.path(), 0.5, 10).unwrap();
        // (1,2) first appears at ts 5, so it precedes (3,4).
        assert_eq!(g.edges, BTreeSet::from([(1, 2)]));
    }

    #[test]
    fn elements_are_sorted_and_deduplicated() {
        let g = Graph {
            nodes: BTreeSet::from([2, 1]),
            edges: BTreeSet::from([(1, 2)]),
        };
        let decoys = DecoySet {
            nodes: BTreeSet::from([-5, 1]),
            edges: BTreeSet::from([(-5, -4)]),
        };
        let all = g.elements_with(&decoys);
        let mut sorted = all.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(all, sorted);
        assert!(all.contains(&GraphElement::node(-5)));
        assert_eq!(
            all.iter().filter(|e| **e == GraphElement::node(1)).count(),
            1
        );
    }

    #[test]
    fn addition_updates_use_fresh_node_ids() {
        let g = Graph {
            nodes: BTreeSet::from([1, 2, 3]),
            edges: BTreeSet::from([(1, 2), (2, 3)]),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let batch = gen_update(
            &g,
            4,
            UpdateKind::Addition,
            &BTreeSet::new(),
            &BTreeSet::new(),
            &mut rng,
        );
        assert_eq!(batch.nodes, BTreeSet::from([4, 5, 6, 7]));
        assert_eq!(batch.edges.len(), 4);
        for &(u, v) in &batch.edges {
            assert!(batch.nodes.contains(&u) || batch.nodes.contains(&v));
        }
    }

    #[test]
    fn deletion_updates_respect_locked_elements() {
        let g = Graph {
            nodes: BTreeSet::from([1, 2, 3, 4, 5]),
            edges: BTreeSet::from([(1, 2), (2, 3), (3, 4), (4, 5)]),
        };
        let locked_nodes = BTreeSet::from([1, 2]);
        let locked_edges = BTreeSet::from([(2, 3)]);
        let mut rng = StdRng::seed_from_u64(2);
        let batch = gen_update(
            &g,
            10,
            UpdateKind::Deletion,
            &locked_nodes,
            &locked_edges,
            &mut rng,
        );
        assert_eq!(batch.edges, BTreeSet::from([(3, 4), (4, 5)]));
        // 4 and 5 lose every edge; 3 keeps (2, 3).
        assert_eq!(batch.nodes, BTreeSet::from([4, 5]));
    }

    #[test]
    fn stream_batches_surface_new_nodes_only() {
        let g = Graph {
            nodes: BTreeSet::from([1, 2]),
            edges: BTreeSet::from([(1, 2)]),
        };
        let batch = UpdateBatch::from_stream(&BTreeSet::from([(2, 3), (3, 4)]), &g);
        assert_eq!(batch.nodes, BTreeSet::from([3, 4]));
        assert_eq!(batch.kind, UpdateKind::Addition);
    }

    #[test]
    fn sampled_graph_contains_the_locked_instance() {
        let mut g = Graph::default();
        for i in 0..50 {
            g.nodes.insert(i);
            g.nodes.insert(i + 1);
            g.edges.insert(edge(i, i + 1));
        }
        let locked_nodes = BTreeSet::from([10, 11]);
        let locked_edges = BTreeSet::from([(10, 11)]);
        let adj = adjacency_list(&g);
        let mut rng = StdRng::seed_from_u64(3);
        let sampled = sample_graph(&adj, 20, &locked_nodes, &locked_edges, &mut rng);
        assert!(sampled.nodes.is_superset(&locked_nodes));
        assert!(sampled.edges.is_superset(&locked_edges));
        assert!(sampled.nodes.len() >= 20);
    }

    #[test]
    fn gen_subgraph_requires_enough_edges() {
        let edges = BTreeSet::from([(1, 2), (2, 3)]);
        let mut rng = StdRng::seed_from_u64(4);
        assert!(gen_subgraph(&edges, 3, &mut rng).is_none());
        let (nodes, sampled) = gen_subgraph(&edges, 2, &mut rng).unwrap();
        assert_eq!(sampled, edges);
        assert_eq!(nodes, BTreeSet::from([1, 2, 3]));
    }
}

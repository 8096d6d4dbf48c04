//! Graph elements, canonical encoding, timestamps, and the decoy mapping
//! for the triple-verification engine.
//!
//! Every party (data owner, cloud server, request party) hashes and signs
//! the *canonical* form of a graph element; this crate is the single place
//! that form is defined.

pub mod decoy;
pub mod digest;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Node identifier. Real datasets use nonnegative IDs; synthetic decoy
/// nodes are negative, which keeps the two ranges disjoint by construction.
pub type NodeId = i64;

/// Unordered edge held as a sorted pair.
pub type EdgeId = (NodeId, NodeId);

/// Canonicalize an unordered edge by sorting its endpoints.
pub fn edge(u: NodeId, v: NodeId) -> EdgeId {
    if u <= v {
        (u, v)
    } else {
        (v, u)
    }
}

/// A graph element: a node or an unordered edge.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug)]
pub enum GraphElement {
    Node(NodeId),
    Edge(EdgeId),
}

impl GraphElement {
    pub fn node(id: NodeId) -> Self {
        GraphElement::Node(id)
    }

    /// Edge element with endpoints canonicalized, so `edge(u, v)` and
    /// `edge(v, u)` are the same element.
    pub fn edge(u: NodeId, v: NodeId) -> Self {
        GraphElement::Edge(edge(u, v))
    }

    /// Canonical string form. All leaf hashes and scalar derivations
    /// operate on this form's UTF-8 bytes.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GraphElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphElement::Node(id) => write!(f, "{id}"),
            GraphElement::Edge((u, v)) => write!(f, "({u}, {v})"),
        }
    }
}

/// Wall-clock timestamp token: 20 ASCII digits (epoch nanoseconds,
/// zero-padded). Opaque to the protocol except as hash input, but the
/// round driver requires tokens to be strictly increasing.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug)]
pub struct Timestamp(String);

impl Timestamp {
    /// Fixed token width; equal-width zero padding makes lexicographic
    /// and numeric order agree.
    pub const DIGITS: usize = 20;

    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Timestamp(format!("{nanos:020}"))
    }

    /// A fresh timestamp strictly greater than `prev`. Delta signatures
    /// break if the ts chain ever stalls, so a non-advancing clock reading
    /// is bumped past the previous token.
    pub fn after(prev: &Timestamp) -> Self {
        let now = Self::now();
        if now > *prev {
            now
        } else {
            prev.next()
        }
    }

    /// Token from a literal digit string (fixtures and replayed rounds).
    pub fn from_digits(digits: &str) -> Self {
        Timestamp(digits.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn next(&self) -> Self {
        let n: u128 = self.0.parse().unwrap_or(0);
        Timestamp(format!("{:020}", n + 1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

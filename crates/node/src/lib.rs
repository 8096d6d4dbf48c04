//! Round-protocol orchestrator for authenticated outsourced graph storage:
//! data-owner updates, cloud-server state, and the request party's triple
//! verification (integrity, freshness, correctness).

pub mod cache;
pub mod config;
pub mod graph;
pub mod protocol;

pub use graph::{Graph, UpdateBatch, UpdateKind};
pub use protocol::{Context, Session, VerifyError};

//! The round protocol: initial outsourcing, update rounds, and query
//! rounds running the three verifications.
//!
//! A session holds all three parties' state. Ownership still follows the
//! protocol: the data owner alone touches `ctx.bls.sk`, the cloud server
//! alone touches `ctx.rsa.d`, the tree, and the filter's contents, and
//! the request party drives verification with `pk`, the aggregate
//! signature, and the current timestamp. Any verification failure is
//! fatal to the session; there are no partial successes.

use std::collections::BTreeSet;

use num_bigint::BigUint;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info};

use filter::{fp_budget, psi, reinsertion, CuckooFilter, FilterError, RsaKeyPair};
use mht::{AaMht, Mht, ProofError};
use primitives::decoy::{mapping_psi, DecoySet};
use primitives::digest::{element_scalar_uint, hex_to_fr};
use primitives::{EdgeId, GraphElement, NodeId, Timestamp};
use sig::{aggregate, sign_delta, sign_initial, BlsKeyPair, PublicKey, Signature};

use crate::graph::{Graph, UpdateBatch, UpdateKind};

/// Key material threaded through the protocol as explicit values.
pub struct Context {
    pub bls: BlsKeyPair,
    pub rsa: RsaKeyPair,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("integrity: {0}")]
    Proof(#[from] ProofError),
    #[error("integrity: recomputed aggregate root does not match the served root")]
    RootMismatch,
    #[error("integrity: aggregate signature does not verify for the current state")]
    SignatureMismatch,
    #[error("freshness: {missing} result elements are missing from the filter")]
    FreshnessFail { missing: usize },
    #[error("correctness: {found} stray query hits exceed the false-positive budget {budget}")]
    CorrectnessFail { found: usize, budget: usize },
    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// The query instance locked for the session; its elements are exempt
/// from deletion batches.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub nodes: BTreeSet<NodeId>,
    pub edges: BTreeSet<EdgeId>,
}

impl Query {
    pub fn elements(&self) -> Vec<GraphElement> {
        self.nodes
            .iter()
            .map(|&n| GraphElement::node(n))
            .chain(self.edges.iter().map(|&(u, v)| GraphElement::edge(u, v)))
            .collect()
    }
}

/// Outcome of one query round.
#[derive(Clone, Copy, Debug)]
pub struct QueryReport {
    /// Elements proven against the aggregate root.
    pub proved: usize,
    /// False-positive hits observed during the correctness probe.
    pub stray_hits: usize,
    /// Budget those hits were allowed.
    pub budget: usize,
}

/// Protocol state carried across rounds.
pub struct Session {
    pub ctx: Context,
    pub graph: Graph,
    pub query: Query,
    pub tree: AaMht,
    pub cf: CuckooFilter,
    pub sigma: Signature,
    pub ts: Timestamp,
    pub decoys: DecoySet,
    pub ts_size: usize,
}

impl Session {
    /// Outsource the graph: bind the first decoy set to `ts0`, build the
    /// initial tree and signature, and fill the filter with every
    /// encrypted element. `planned_items` reserves filter capacity for
    /// the update volume the driver intends to push, since the filter is
    /// sized once. Returns the session plus the graph ciphertexts so the
    /// caller can cache them on disk.
    pub fn init(
        ctx: Context,
        graph: Graph,
        query: Query,
        ts_size: usize,
        ts0: Timestamp,
        cached: Option<Vec<BigUint>>,
        planned_items: usize,
    ) -> Result<(Self, Vec<BigUint>), VerifyError> {
        let decoys = mapping_psi(&ts0, ts_size);

        let leaves = graph.elements_with(&decoys);
        let init_root = Mht::build(leaves.clone()).root_fr();
        let sigma = sign_initial(&ctx.bls.sk, &ts0, init_root);
        let tree = AaMht::new(leaves);

        let graph_elements = graph.elements();
        let graph_cts = match cached {
            Some(c) if c.len() == graph_elements.len() => c,
            Some(_) => {
                debug!("cached ciphertexts are stale; re-encrypting");
                ctx.rsa.encrypt_batch(&graph_elements)
            }
            None => ctx.rsa.encrypt_batch(&graph_elements),
        };
        let decoy_cts = ctx.rsa.encrypt_batch(&decoys.elements());

        let mut cf =
            CuckooFilter::with_capacity_for(graph_cts.len() + decoy_cts.len() + planned_items);
        let all: Vec<BigUint> = graph_cts.iter().chain(&decoy_cts).cloned().collect();
        for ct in &all {
            cf.insert(ct);
        }
        reinsertion(&mut cf, &all)?;

        info!(
            elements = graph_elements.len() + decoy_cts.len(),
            filter_items = cf.n_items(),
            "outsourcing initialized"
        );

        Ok((
            Session {
                ctx,
                graph,
                query,
                tree,
                cf,
                sigma,
                ts: ts0,
                decoys,
                ts_size,
            },
            graph_cts,
        ))
    }

    /// Apply one update round.
    ///
    /// The data owner derives the fresh decoy set and signs the root
    /// delta; the cloud server mirrors the same delta into its tree and
    /// filter; the request party aggregates. All session state lands
    /// together at the end of the straight-line section, so a failed
    /// round leaves the previous round's state intact.
    pub fn update(&mut self, batch: UpdateBatch) -> Result<(), VerifyError> {
        let ts_new = Timestamp::after(&self.ts);
        let decoys = mapping_psi(&ts_new, self.ts_size);
        let s_items = decoys.elements();
        let update_items = batch.elements();

        // Data owner: batch tree roots and the delta signature. On
        // addition the decoys ride in the same tree as the update; on
        // deletion they get their own tree and the update root is
        // subtracted.
        let delta_root = match batch.kind {
            UpdateKind::Addition => Mht::build(merge_sorted(&update_items, &s_items)).root_fr(),
            UpdateKind::Deletion => {
                Mht::build(s_items.clone()).root_fr() - Mht::build(update_items.clone()).root_fr()
            }
        };
        let sigma_delta = sign_delta(&self.ctx.bls.sk, &self.ts, &ts_new, delta_root);

        // Cloud server: stage the filter mutation on a copy. Reinsertion
        // is the only fallible step of the round, so staging it keeps an
        // aborted round from leaving half-applied state behind.
        let enc_update = self.ctx.rsa.encrypt_batch(&update_items);
        let enc_s = self.ctx.rsa.encrypt_batch(&s_items);
        let mut staged = self.cf.clone();
        match batch.kind {
            UpdateKind::Addition => {
                let mut inserted = enc_update;
                inserted.extend(enc_s);
                for ct in &inserted {
                    staged.insert(ct);
                }
                reinsertion(&mut staged, &inserted)?;
            }
            UpdateKind::Deletion => {
                for ct in &enc_s {
                    staged.insert(ct);
                }
                reinsertion(&mut staged, &enc_s)?;
                staged.delete(enc_update.iter());
            }
        }

        // Commit: tree, filter, graph sets, signature, and timestamp move
        // together.
        match batch.kind {
            UpdateKind::Addition => {
                self.tree.add(merge_sorted(&update_items, &s_items));
                self.graph.nodes.extend(&batch.nodes);
                self.graph.edges.extend(&batch.edges);
            }
            UpdateKind::Deletion => {
                self.tree.del(update_items.clone());
                self.tree.add(s_items.clone());
                for n in &batch.nodes {
                    self.graph.nodes.remove(n);
                }
                for e in &batch.edges {
                    self.graph.edges.remove(e);
                }
            }
        }
        self.cf = staged;
        self.sigma = aggregate(&self.sigma, &sigma_delta);
        self.ts = ts_new;
        self.decoys = decoys;
        Ok(())
    }

    /// Run the three verifications for the locked query's ground-truth
    /// result, then restore the filter for the next round.
    pub fn query_round<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<QueryReport, VerifyError> {
        let rq = self.query.elements();
        self.verify_result(&rq, rng)
    }

    /// Verify a served result set `rq` against the current state.
    pub fn verify_result<R: Rng + ?Sized>(
        &mut self,
        rq: &[GraphElement],
        rng: &mut R,
    ) -> Result<QueryReport, VerifyError> {
        verify_integrity(rq, &self.tree, &self.ctx.bls.pk, &self.ts, &self.sigma)?;

        let s_items = self.decoys.elements();
        let q = self.query.elements();
        let stray_hits =
            verify_freshness_correctness(&q, &s_items, rq, &mut self.cf, &self.ctx.rsa, rng)?;

        // The freshness probe consumed rq ∪ S from the filter; put the
        // ciphertexts back so the next round starts complete.
        let restore = merge_sorted(&s_items, rq);
        let cts = self.ctx.rsa.encrypt_batch(&restore);
        for ct in &cts {
            self.cf.insert(ct);
        }
        reinsertion(&mut self.cf, &cts)?;

        Ok(QueryReport {
            proved: rq.len(),
            stray_hits,
            budget: fp_budget(q.len()),
        })
    }
}

/// Integrity: every result element proves membership, every proof
/// recomputes to the served aggregate root, and the aggregate signature
/// binds that root to the current timestamp.
pub fn verify_integrity(
    rq: &[GraphElement],
    tree: &AaMht,
    pk: &PublicKey,
    ts: &Timestamp,
    sigma: &Signature,
) -> Result<(), VerifyError> {
    let mut served_root: Option<String> = None;
    for e in rq {
        let proof = tree.proof(e)?;
        let recomputed = AaMht::verify_aa(&proof)?;
        if recomputed != proof.root {
            return Err(VerifyError::RootMismatch);
        }
        served_root.get_or_insert(proof.root);
    }

    if let Some(root_hex) = served_root {
        let root = hex_to_fr(&root_hex)
            .map_err(|e| ProofError::MalformedProof(format!("aggregate root: {e}")))?;
        if !sig::verify(pk, ts, root, sigma) {
            return Err(VerifyError::SignatureMismatch);
        }
    }
    Ok(())
}

/// Freshness then correctness against the filter.
///
/// Freshness: every element of `rq ∪ s` must be present; on success those
/// ciphertexts are deleted from the filter. Correctness: with the result
/// removed, probing the raw query `q` must find almost nothing, since any
/// element the served result silently dropped would still be present.
/// Returns the stray-hit count.
pub fn verify_freshness_correctness<R: Rng + ?Sized>(
    q: &[GraphElement],
    s: &[GraphElement],
    rq: &[GraphElement],
    cf: &mut CuckooFilter,
    rsa: &RsaKeyPair,
    rng: &mut R,
) -> Result<usize, VerifyError> {
    let augmented = merge_sorted(s, rq);
    let unblinded = psi_fetch(&augmented, rsa, rng);
    let missing = unblinded.iter().filter(|ct| !cf.seek(ct)).count();
    if missing > 0 {
        return Err(VerifyError::FreshnessFail { missing });
    }
    cf.delete(unblinded.iter());

    let q_cts = psi_fetch(q, rsa, rng);
    let found = q_cts.iter().filter(|ct| cf.seek(ct)).count();
    let budget = fp_budget(q.len());
    if found > budget {
        return Err(VerifyError::CorrectnessFail { found, budget });
    }
    Ok(found)
}

/// One blinded PSI round-trip: blind on the request party, respond on the
/// cloud server, unblind back into plain ciphertexts.
pub fn psi_fetch<R: Rng + ?Sized>(
    elements: &[GraphElement],
    rsa: &RsaKeyPair,
    rng: &mut R,
) -> Vec<BigUint> {
    let messages: Vec<BigUint> = elements.iter().map(element_scalar_uint).collect();
    let challenge = psi::Challenge::blind(&messages, &rsa.n, &rsa.e, rng);
    let responses = psi::respond(&challenge.blinded, rsa);
    challenge.unblind(&responses, &rsa.n)
}

/// Union of two canonically sorted element slices, sorted and
/// deduplicated.
pub fn merge_sorted(a: &[GraphElement], b: &[GraphElement]) -> Vec<GraphElement> {
    let mut set: BTreeSet<GraphElement> = a.iter().copied().collect();
    set.extend(b.iter().copied());
    set.into_iter().collect()
}

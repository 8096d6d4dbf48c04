//! Blinded PSI challenge against the cuckoo filter, plus the reinsertion
//! pass that repairs displaced fingerprints after bulk inserts.
//!
//! The request party never learns `D` and the cloud server never learns
//! which elements are being probed: the challenge travels blinded by a
//! fresh unit `r` per message.

use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::One;
use rand::Rng;
use tracing::{debug, warn};

use crate::rsa::{mod_inverse, RsaKeyPair};
use crate::{CuckooFilter, FilterError, BUCKET_SIZE, FP_BITS};

/// Retry bound for the reinsertion pass.
pub const MAX_REINSERT_RETRIES: usize = 30;

/// Abort reinsertion when the missing set grows past this factor: more
/// fingerprints are being evicted than repaired.
const GROWTH_STOP: f64 = 1.5;

/// A blinded PSI challenge. `blinded` goes to the cloud server; the
/// unblinding factors never leave the request party.
pub struct Challenge {
    pub blinded: Vec<BigUint>,
    r_invs: Vec<BigUint>,
}

impl Challenge {
    /// Blind message scalars under the public key `(N, E)`:
    /// `bᵢ = mᵢ·rᵢ^E mod N` with a fresh `rᵢ ∈ [2, N)` coprime to N.
    pub fn blind<R: Rng + ?Sized>(
        messages: &[BigUint],
        n: &BigUint,
        e: &BigUint,
        rng: &mut R,
    ) -> Self {
        let two = BigUint::from(2u32);
        let mut blinded = Vec::with_capacity(messages.len());
        let mut r_invs = Vec::with_capacity(messages.len());
        for m in messages {
            let (r, r_inv) = loop {
                let r = rng.gen_biguint_range(&two, n);
                if r.gcd(n).is_one() {
                    if let Some(inv) = mod_inverse(&r, n) {
                        break (r, inv);
                    }
                }
            };
            blinded.push((m * r.modpow(e, n)) % n);
            r_invs.push(r_inv);
        }
        Challenge { blinded, r_invs }
    }

    /// Strip the blinding from the server's responses, recovering the
    /// plain ciphertexts `mᵢ^D mod N`.
    pub fn unblind(&self, responses: &[BigUint], n: &BigUint) -> Vec<BigUint> {
        responses
            .iter()
            .zip(&self.r_invs)
            .map(|(s, r_inv)| (s * r_inv) % n)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blinded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blinded.is_empty()
    }
}

/// Cloud-server side of the challenge: `sᵢ = bᵢ^D mod N`.
pub fn respond(blinded: &[BigUint], keys: &RsaKeyPair) -> Vec<BigUint> {
    blinded.iter().map(|b| keys.encrypt_scalar(b)).collect()
}

/// Re-insert every item of `items` that no longer answers `seek`.
///
/// Bulk inserts can strand fingerprints out of reach of their two
/// candidate buckets (the partner relation is lossy under the bucket
/// modulus); this pass converges when capacity is adequate. Failure after
/// the retry bound, or a missing set growing past 1.5× between passes, is
/// an operational capacity fault, not a security failure.
pub fn reinsertion(filter: &mut CuckooFilter, items: &[BigUint]) -> Result<(), FilterError> {
    let mut previous = usize::MAX;
    for retry in 0..MAX_REINSERT_RETRIES {
        let missing: Vec<&BigUint> = items.iter().filter(|i| !filter.seek(i)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        if previous != usize::MAX && missing.len() as f64 > GROWTH_STOP * previous as f64 {
            warn!(
                missing = missing.len(),
                previous, "reinsertion is evicting more than it repairs"
            );
            return Err(FilterError::Overflow {
                missing: missing.len(),
                retries: retry,
            });
        }
        debug!(
            missing = missing.len(),
            attempt = retry + 1,
            "re-inserting missing fingerprints"
        );
        previous = missing.len();
        for item in missing {
            filter.insert(item);
        }
    }

    let missing = items.iter().filter(|i| !filter.seek(i)).count();
    if missing == 0 {
        Ok(())
    } else {
        Err(FilterError::Overflow {
            missing,
            retries: MAX_REINSERT_RETRIES,
        })
    }
}

/// Tolerated false-positive count when probing `n_queries` items that are
/// expected absent: 3× the theoretical rate `2·bucket_size / 2^fp_size`
/// plus a small additive slack.
pub fn fp_budget(n_queries: usize) -> usize {
    let rate = (2 * BUCKET_SIZE) as f64 / (1u64 << FP_BITS) as f64;
    (n_queries as f64 * rate * 3.0).ceil() as usize + 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitives::digest::element_scalar_uint;
    use primitives::GraphElement;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn keys() -> RsaKeyPair {
        RsaKeyPair::generate(512, &mut StdRng::seed_from_u64(23))
    }

    #[test]
    fn unblinding_recovers_the_plain_ciphertext() {
        let keys = keys();
        let mut rng = StdRng::seed_from_u64(1);
        let elements: Vec<GraphElement> = (1..=8).map(GraphElement::node).collect();
        let messages: Vec<_> = elements.iter().map(element_scalar_uint).collect();

        let challenge = Challenge::blind(&messages, &keys.n, &keys.e, &mut rng);
        let responses = respond(&challenge.blinded, &keys);
        let recovered = challenge.unblind(&responses, &keys.n);

        for (e, c) in elements.iter().zip(&recovered) {
            assert_eq!(keys.encrypt_element(e), *c);
        }
    }

    #[test]
    fn blinding_hides_the_message() {
        let keys = keys();
        let mut rng = StdRng::seed_from_u64(2);
        let m = element_scalar_uint(&GraphElement::node(5));
        let a = Challenge::blind(std::slice::from_ref(&m), &keys.n, &keys.e, &mut rng);
        let b = Challenge::blind(std::slice::from_ref(&m), &keys.n, &keys.e, &mut rng);
        // Fresh blinding factors: same message, different challenges.
        assert_ne!(a.blinded, b.blinded);
    }

    #[test]
    fn psi_membership_end_to_end() {
        let keys = keys();
        let mut rng = StdRng::seed_from_u64(3);
        let present: Vec<GraphElement> = (1..=30).map(GraphElement::node).collect();
        let absent: Vec<GraphElement> = (100..=129).map(GraphElement::node).collect();

        let ciphertexts = keys.encrypt_batch(&present);
        let mut cf = CuckooFilter::with_capacity_for(ciphertexts.len());
        for c in &ciphertexts {
            cf.insert(c);
        }
        reinsertion(&mut cf, &ciphertexts).unwrap();

        let probe = |elements: &[GraphElement], rng: &mut StdRng| -> Vec<bool> {
            let messages: Vec<_> = elements.iter().map(element_scalar_uint).collect();
            let challenge = Challenge::blind(&messages, &keys.n, &keys.e, rng);
            let responses = respond(&challenge.blinded, &keys);
            challenge
                .unblind(&responses, &keys.n)
                .iter()
                .map(|c| cf.seek(c))
                .collect()
        };

        assert!(probe(&present, &mut rng).into_iter().all(|found| found));
        let hits = probe(&absent, &mut rng)
            .into_iter()
            .filter(|&found| found)
            .count();
        assert!(hits <= fp_budget(absent.len()), "hits = {hits}");
    }

    #[test]
    fn fp_budget_scales_with_query_size() {
        assert_eq!(fp_budget(0), 3);
        // 2·4/4096 ≈ 0.2%; triple it and add the slack.
        assert_eq!(fp_budget(1000), (1000.0f64 * 0.005859375).ceil() as usize + 3);
        assert!(fp_budget(10) >= 4);
    }
}

//! BN-254 curve context and the homomorphic BLS scheme that binds a
//! timestamp and an aggregate Merkle root to one signature.
//!
//! The message is a curve point `M(ts, r) = [scalar(ts)]·G1 + [r]·H`, so a
//! delta signature over `(ts_prev → ts_new, Δr)` aggregates (by point
//! addition) with the running signature into exactly the signature of the
//! new state. Verification is the pairing check `e(σ, G2) == e(M, pk)`.

use ark_bn254::{Bn254, Fq, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::pairing::Pairing;
use ark_ec::{AffineRepr, CurveGroup, PrimeGroup};
use ark_ff::{UniformRand, Zero};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use primitives::digest::ts_scalar;
use primitives::Timestamp;

/// Scalar multiplier of the fixed root-embedding base point `H`.
const ROOT_BASE_SCALAR: u64 = 5_201_314;

/// Fixed base point `H = [5201314]·G1` used to embed roots.
pub fn root_base() -> G1Projective {
    G1Projective::generator() * Fr::from(ROOT_BASE_SCALAR)
}

/// Timestamp embedding `[scalar(ts)]·G1`.
pub fn ts_point(ts: &Timestamp) -> G1Projective {
    G1Projective::generator() * ts_scalar(ts)
}

fn message_point(ts: &Timestamp, root: Fr) -> G1Projective {
    ts_point(ts) + root_base() * root
}

/// Signing key, held only by the data owner.
#[derive(Clone, Debug)]
pub struct SecretKey(Fr);

impl SecretKey {
    /// The raw scalar, for key persistence.
    pub fn scalar(&self) -> Fr {
        self.0
    }
}

/// Verification key `pk = [sk]·G2`, broadcast to the request party.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PublicKey(pub G2Projective);

/// A signature: one G1 point. Aggregation is point addition.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Signature(pub G1Projective);

/// Data-owner key pair.
#[derive(Clone, Debug)]
pub struct BlsKeyPair {
    pub sk: SecretKey,
    pub pk: PublicKey,
}

impl BlsKeyPair {
    /// Rebuild a pair from a persisted secret scalar.
    pub fn from_scalar(sk: Fr) -> Self {
        BlsKeyPair {
            pk: PublicKey(G2Projective::generator() * sk),
            sk: SecretKey(sk),
        }
    }
}

/// Sample `sk ∈ [1, q)` and derive `pk`.
pub fn keygen<R: rand::Rng + ?Sized>(rng: &mut R) -> BlsKeyPair {
    let mut sk = Fr::rand(rng);
    while sk.is_zero() {
        sk = Fr::rand(rng);
    }
    BlsKeyPair::from_scalar(sk)
}

/// Sign the initial outsourced state `(ts, r)`.
pub fn sign_initial(sk: &SecretKey, ts: &Timestamp, root: Fr) -> Signature {
    Signature(message_point(ts, root) * sk.0)
}

/// Sign one update step: the timestamp moves `prev → next` and the
/// aggregate root moves by `delta_root` (negative contributions are the
/// caller's responsibility via field negation).
pub fn sign_delta(
    sk: &SecretKey,
    prev_ts: &Timestamp,
    next_ts: &Timestamp,
    delta_root: Fr,
) -> Signature {
    let step = ts_point(next_ts) - ts_point(prev_ts) + root_base() * delta_root;
    Signature(step * sk.0)
}

/// Aggregate two signatures by point addition.
pub fn aggregate(a: &Signature, b: &Signature) -> Signature {
    Signature(a.0 + b.0)
}

/// Pairing check `e(σ, G2) == e(M(ts, r), pk)`.
pub fn verify(pk: &PublicKey, ts: &Timestamp, root: Fr, sig: &Signature) -> bool {
    let lhs = Bn254::pairing(sig.0.into_affine(), G2Affine::generator());
    let rhs = Bn254::pairing(message_point(ts, root).into_affine(), pk.0.into_affine());
    lhs == rhs
}

/// Wire form of a signature: the affine coordinates as canonical hex.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SignatureWire {
    pub x: String,
    pub y: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("coordinate is not hex: {0}")]
    BadHex(String),
    #[error("point is not on the curve")]
    NotOnCurve,
}

fn fq_to_hex(v: &Fq) -> String {
    hex::encode(BigUint::from(*v).to_bytes_be())
}

fn fq_from_hex(s: &str) -> Result<Fq, WireError> {
    let n = BigUint::parse_bytes(s.as_bytes(), 16)
        .ok_or_else(|| WireError::BadHex(s.to_string()))?;
    Ok(Fq::from(n))
}

impl Signature {
    /// The identity (which no honestly produced signature is) encodes as
    /// the reserved pair `("00", "00")`, which is not a curve point.
    pub fn to_wire(&self) -> SignatureWire {
        let aff = self.0.into_affine();
        if aff.is_zero() {
            return SignatureWire {
                x: "00".into(),
                y: "00".into(),
            };
        }
        SignatureWire {
            x: fq_to_hex(&aff.x),
            y: fq_to_hex(&aff.y),
        }
    }

    pub fn from_wire(wire: &SignatureWire) -> Result<Self, WireError> {
        let x = fq_from_hex(&wire.x)?;
        let y = fq_from_hex(&wire.y)?;
        if x.is_zero() && y.is_zero() {
            return Ok(Signature(G1Projective::zero()));
        }
        let aff = G1Affine::new_unchecked(x, y);
        if !aff.is_on_curve() || !aff.is_in_correct_subgroup_assuming_on_curve() {
            return Err(WireError::NotOnCurve);
        }
        Ok(Signature(aff.into_group()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::One;
    use primitives::digest::data_scalar;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ts(digits: &str) -> Timestamp {
        Timestamp::from_digits(digits)
    }

    fn keys() -> BlsKeyPair {
        keygen(&mut StdRng::seed_from_u64(7))
    }

    #[test]
    fn initial_signature_verifies() {
        let kp = keys();
        let t0 = ts("20240101000000000000");
        let r0 = data_scalar(b"root-0");
        let sig = sign_initial(&kp.sk, &t0, r0);
        assert!(verify(&kp.pk, &t0, r0, &sig));
    }

    #[test]
    fn wrong_root_or_timestamp_fails() {
        let kp = keys();
        let t0 = ts("20240101000000000000");
        let r0 = data_scalar(b"root-0");
        let sig = sign_initial(&kp.sk, &t0, r0);
        assert!(!verify(&kp.pk, &t0, r0 + Fr::one(), &sig));
        assert!(!verify(&kp.pk, &ts("20240101000000000001"), r0, &sig));
    }

    #[test]
    fn delta_chain_aggregates_to_the_current_state() {
        let kp = keys();
        let stamps = [
            ts("20240101000000000000"),
            ts("20240101000000000001"),
            ts("20240101000000000002"),
            ts("20240101000000000003"),
        ];
        let r0 = data_scalar(b"root-0");
        let deltas = [
            data_scalar(b"delta-1"),
            -data_scalar(b"delta-2"),
            data_scalar(b"delta-3"),
        ];

        let mut sig = sign_initial(&kp.sk, &stamps[0], r0);
        let mut root = r0;
        for (i, dr) in deltas.iter().enumerate() {
            let step = sign_delta(&kp.sk, &stamps[i], &stamps[i + 1], *dr);
            sig = aggregate(&sig, &step);
            root += dr;
        }

        assert!(verify(&kp.pk, &stamps[3], root, &sig));
        // Intermediate states no longer verify.
        assert!(!verify(&kp.pk, &stamps[0], r0, &sig));
    }

    #[test]
    fn skipping_a_delta_breaks_the_ts_chain() {
        let kp = keys();
        let t0 = ts("20240101000000000000");
        let t1 = ts("20240101000000000001");
        let t2 = ts("20240101000000000002");
        let r0 = data_scalar(b"root-0");
        let d1 = data_scalar(b"delta-1");
        let d2 = data_scalar(b"delta-2");

        let sig0 = sign_initial(&kp.sk, &t0, r0);
        // Aggregate the t1→t2 step without the t0→t1 step.
        let step2 = sign_delta(&kp.sk, &t1, &t2, d2);
        let sig = aggregate(&sig0, &step2);
        assert!(!verify(&kp.pk, &t2, r0 + d1 + d2, &sig));
        assert!(!verify(&kp.pk, &t2, r0 + d2, &sig));
    }

    #[test]
    fn wire_round_trip() {
        let kp = keys();
        let sig = sign_initial(&kp.sk, &ts("20240101000000000000"), data_scalar(b"r"));
        let wire = sig.to_wire();
        let json = serde_json::to_string(&wire).unwrap();
        let back: SignatureWire = serde_json::from_str(&json).unwrap();
        assert_eq!(Signature::from_wire(&back).unwrap(), sig);
    }

    #[test]
    fn off_curve_wire_point_is_rejected() {
        let kp = keys();
        let mut wire = sign_initial(&kp.sk, &ts("20240101000000000000"), Fr::one()).to_wire();
        wire.y = "0123".into();
        assert_eq!(Signature::from_wire(&wire).unwrap_err(), WireError::NotOnCurve);
        wire.y = "zz".into();
        assert!(matches!(
            Signature::from_wire(&wire),
            Err(WireError::BadHex(_))
        ));
    }
}

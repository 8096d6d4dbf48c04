//! SHA-256 digests and scalar derivation shared by every party.
//!
//! Roots and element scalars live in the BN-254 scalar field `Fr` so the
//! arithmetic aggregate of Merkle roots stays in the same group as the
//! homomorphic signatures.

use ark_bn254::Fr;
use ark_ff::PrimeField;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::{GraphElement, Timestamp};

/// SHA-256 of a byte string.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

/// Leaf digest of a graph element (SHA-256 of its canonical form).
pub fn element_hash(e: &GraphElement) -> [u8; 32] {
    sha256(e.canonical().as_bytes())
}

/// Hash arbitrary data and interpret the digest big-endian, reduced mod q.
pub fn data_scalar(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(&sha256(bytes))
}

/// Scalar representation of a graph element: the PSI message `m`.
pub fn element_scalar(e: &GraphElement) -> Fr {
    data_scalar(e.canonical().as_bytes())
}

/// The same scalar as an arbitrary-precision integer, for RSA arithmetic.
pub fn element_scalar_uint(e: &GraphElement) -> BigUint {
    element_scalar(e).into()
}

/// Scalar derived from a timestamp token.
pub fn ts_scalar(ts: &Timestamp) -> Fr {
    data_scalar(ts.as_str().as_bytes())
}

/// Canonical lowercase hex of a field element: minimal big-endian bytes,
/// always an even number of hex digits, `"00"` for zero.
pub fn fr_to_hex(v: &Fr) -> String {
    hex::encode(BigUint::from(*v).to_bytes_be())
}

/// Parse a hex root back into the scalar field, reducing mod q. Accepts
/// odd-length strings by left-padding a nibble so digest-sized roots from
/// foreign encoders still parse.
pub fn hex_to_fr(s: &str) -> Result<Fr, hex::FromHexError> {
    let bytes = if s.len() % 2 == 1 {
        hex::decode(format!("0{s}"))?
    } else {
        hex::decode(s)?
    };
    Ok(Fr::from_be_bytes_mod_order(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::{One, Zero};

    #[test]
    fn canonical_scalars_agree_across_edge_orderings() {
        let a = element_scalar(&GraphElement::edge(7, 3));
        let b = element_scalar(&GraphElement::edge(3, 7));
        assert_eq!(a, b);
    }

    #[test]
    fn node_and_edge_scalars_differ() {
        let n = element_scalar(&GraphElement::node(3));
        let e = element_scalar(&GraphElement::edge(3, 3));
        assert_ne!(n, e);
    }

    #[test]
    fn fr_hex_round_trip() {
        let v = data_scalar(b"round-trip");
        let s = fr_to_hex(&v);
        assert_eq!(s.len() % 2, 0);
        assert_eq!(hex_to_fr(&s).unwrap(), v);
    }

    #[test]
    fn fr_hex_zero_and_one() {
        assert_eq!(fr_to_hex(&Fr::zero()), "00");
        assert_eq!(fr_to_hex(&Fr::one()), "01");
        assert_eq!(hex_to_fr("00").unwrap(), Fr::zero());
        assert_eq!(hex_to_fr("1").unwrap(), Fr::one());
    }

    #[test]
    fn scalar_matches_digest_reduction() {
        // The scalar must be the big-endian digest reduced mod q, not a
        // truncation.
        let e = GraphElement::node(1);
        let digest = element_hash(&e);
        let wide = BigUint::from_bytes_be(&digest);
        let q: BigUint = Fr::MODULUS.into();
        assert_eq!(BigUint::from(element_scalar(&e)), wide % q);
    }
}

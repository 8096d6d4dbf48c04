//! RSA key material and the deterministic blind-capable encryption the
//! cloud server applies to every graph element.
//!
//! The ciphertext of an element is `scalar(e)^D mod N`; only the cloud
//! server holds `D`, so the filter's contents cannot be forged by the
//! request party, while the blinded challenge protocol in [`crate::psi`]
//! still lets the request party obtain ciphertexts obliviously.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;
use rayon::prelude::*;

use primitives::digest::element_scalar_uint;
use primitives::GraphElement;

/// Modulus size for production keys: two 512-bit primes.
pub const MODULUS_BITS: u64 = 1024;
/// Standard public exponent.
pub const PUBLIC_EXPONENT: u32 = 65_537;

/// Chunk size for the parallel bulk-encryption map.
const ENCRYPT_CHUNK: usize = 500;

/// RSA key triple. `(n, e)` is broadcast; `d` never leaves the cloud
/// server.
#[derive(Clone, Debug)]
pub struct RsaKeyPair {
    pub n: BigUint,
    pub e: BigUint,
    pub d: BigUint,
}

impl RsaKeyPair {
    /// Generate a key pair with a modulus of `bits` bits. `modpow` here is
    /// not constant-time; acceptable for this engine, noted in DESIGN.md.
    pub fn generate<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> Self {
        let e = BigUint::from(PUBLIC_EXPONENT);
        loop {
            let p = gen_prime(bits / 2, rng);
            let q = loop {
                let q = gen_prime(bits / 2, rng);
                if q != p {
                    break q;
                }
            };
            let n = &p * &q;
            let phi = (&p - 1u32) * (&q - 1u32);
            if let Some(d) = mod_inverse(&e, &phi) {
                return RsaKeyPair { n, e, d };
            }
        }
    }

    /// Production-size key pair.
    pub fn generate_default<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::generate(MODULUS_BITS, rng)
    }

    /// Deterministic encryption of a message scalar: `m^D mod N`.
    pub fn encrypt_scalar(&self, m: &BigUint) -> BigUint {
        m.modpow(&self.d, &self.n)
    }

    /// Deterministic encryption of one graph element.
    pub fn encrypt_element(&self, e: &GraphElement) -> BigUint {
        self.encrypt_scalar(&element_scalar_uint(e))
    }

    /// Bulk-encrypt a batch on the rayon pool, chunked. The graph-wide
    /// encryption pass is embarrassingly parallel and dominated by the
    /// modular exponentiations.
    pub fn encrypt_batch(&self, elements: &[GraphElement]) -> Vec<BigUint> {
        elements
            .par_iter()
            .with_min_len(ENCRYPT_CHUNK)
            .map(|e| self.encrypt_element(e))
            .collect()
    }
}

/// `a⁻¹ mod m` via the extended Euclidean algorithm.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a = BigInt::from(a.clone());
    let m = BigInt::from(m.clone());
    let ext = a.extended_gcd(&m);
    if !ext.gcd.is_one() {
        return None;
    }
    ext.x.mod_floor(&m).to_biguint()
}

const SMALL_PRIMES: [u32; 15] = [3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53];

const MILLER_RABIN_ROUNDS: usize = 40;

fn gen_prime<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, rng) {
            return candidate;
        }
    }
}

fn is_probable_prime<R: Rng + ?Sized>(n: &BigUint, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    if n == &two {
        return true;
    }
    if n.is_even() {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n − 1 = d · 2^s with d odd.
    let one = BigUint::one();
    let n_minus_1 = n - &one;
    let s = n_minus_1.trailing_zeros().unwrap_or(0);
    let d = &n_minus_1 >> s;

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_1);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_1 {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_keys() -> RsaKeyPair {
        // 512-bit modulus keeps tests quick while staying wider than the
        // 254-bit message scalars.
        RsaKeyPair::generate(512, &mut StdRng::seed_from_u64(11))
    }

    #[test]
    fn key_pair_satisfies_the_rsa_identity() {
        let keys = test_keys();
        let m = BigUint::from(0x1234_5678u64);
        let c = keys.encrypt_scalar(&m);
        assert_eq!(c.modpow(&keys.e, &keys.n), m);
    }

    #[test]
    fn encryption_is_deterministic_and_canonical() {
        let keys = test_keys();
        let a = keys.encrypt_element(&GraphElement::edge(4, 2));
        let b = keys.encrypt_element(&GraphElement::edge(2, 4));
        assert_eq!(a, b);
        assert_ne!(a, keys.encrypt_element(&GraphElement::edge(2, 5)));
    }

    #[test]
    fn batch_encryption_matches_single_encryption() {
        let keys = test_keys();
        let elements: Vec<GraphElement> = (1..=12).map(GraphElement::node).collect();
        let batch = keys.encrypt_batch(&elements);
        for (e, c) in elements.iter().zip(&batch) {
            assert_eq!(keys.encrypt_element(e), *c);
        }
    }

    #[test]
    fn mod_inverse_agrees_with_multiplication() {
        let m = BigUint::from(101u32);
        for a in [2u32, 3, 10, 57, 100] {
            let a = BigUint::from(a);
            let inv = mod_inverse(&a, &m).unwrap();
            assert_eq!((a * inv) % &m, BigUint::one());
        }
        assert!(mod_inverse(&BigUint::from(5u32), &BigUint::from(10u32)).is_none());
    }

    #[test]
    fn small_prime_checks() {
        let mut rng = StdRng::seed_from_u64(5);
        for p in [2u32, 3, 5, 101, 65_537] {
            assert!(is_probable_prime(&BigUint::from(p), &mut rng), "{p}");
        }
        for c in [1u32, 9, 15, 100, 65_535] {
            assert!(!is_probable_prime(&BigUint::from(c), &mut rng), "{c}");
        }
    }
}

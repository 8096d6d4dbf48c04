//! Cuckoo filter over RSA-blinded graph elements, plus the PSI challenge
//! protocol that queries it without revealing the query.

pub mod psi;
pub mod rsa;

use num_bigint::BigUint;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use psi::{fp_budget, reinsertion, Challenge};
pub use rsa::RsaKeyPair;

/// Fingerprints per bucket.
pub const BUCKET_SIZE: usize = 4;
/// Relocation bound before an insert gives up.
pub const MAX_KICKS: usize = 100;
/// Fingerprint width in bits.
pub const FP_BITS: u32 = 12;
/// Target load used when sizing a filter for an item count.
pub const LOAD_FACTOR: f64 = 0.5;

const FP_MASK: u64 = (1 << FP_BITS) - 1;

const FP_SALT: &[u8] = b"fp_salt_";
const IDX1_SALT: &[u8] = b"idx1_salt_";
const IDX2_SALT: &[u8] = b"idx2_salt_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("cuckoo filter overflow: {missing} items unplaceable after {retries} reinsertion retries")]
    Overflow { missing: usize, retries: usize },
}

/// Bucket count for `n_items` at the target load factor.
pub fn capacity_for(n_items: usize) -> usize {
    let buckets = (n_items as f64 / LOAD_FACTOR / BUCKET_SIZE as f64).ceil() as usize;
    buckets.max(1)
}

fn salted_hash(salt: &[u8], data: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(data);
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Fixed-size cuckoo filter of 12-bit fingerprints (`0` = empty slot).
///
/// The table is broadcast to the request party, so it serializes as the
/// raw bucket array.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct CuckooFilter {
    buckets: Vec<[u16; BUCKET_SIZE]>,
    n_items: usize,
}

impl CuckooFilter {
    pub fn new(n_buckets: usize) -> Self {
        CuckooFilter {
            buckets: vec![[0u16; BUCKET_SIZE]; n_buckets.max(1)],
            n_items: 0,
        }
    }

    /// Filter sized for `n_items` at the target load factor.
    pub fn with_capacity_for(n_items: usize) -> Self {
        Self::new(capacity_for(n_items))
    }

    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    fn fp_and_indices(&self, item: &BigUint) -> (u16, usize, usize) {
        let bytes = item.to_bytes_be();
        let fp = (salted_hash(FP_SALT, &bytes) & FP_MASK).max(1) as u16;
        let idx1 = (salted_hash(IDX1_SALT, &bytes) % self.buckets.len() as u64) as usize;
        let idx2 = self.partner_index(idx1, fp);
        (fp, idx1, idx2)
    }

    /// Partner bucket: `idx ⊕ hash(fp) mod n_buckets`. The modulus makes
    /// the relation non-involutive for non-power-of-two sizes; displaced
    /// fingerprints can drift out of reach of `seek`, which is exactly
    /// what the reinsertion pass repairs.
    fn partner_index(&self, idx: usize, fp: u16) -> usize {
        let fp_hash = salted_hash(IDX2_SALT, &fp.to_be_bytes());
        ((idx as u64 ^ fp_hash) % self.buckets.len() as u64) as usize
    }

    fn place(&mut self, idx: usize, fp: u16) -> bool {
        for slot in self.buckets[idx].iter_mut() {
            if *slot == 0 {
                *slot = fp;
                self.n_items += 1;
                return true;
            }
        }
        false
    }

    /// Insert one blinded item. Returns false when both candidate buckets
    /// are full and `MAX_KICKS` relocations found no empty slot.
    pub fn insert(&mut self, item: &BigUint) -> bool {
        let (fp, idx1, idx2) = self.fp_and_indices(item);
        if self.place(idx1, fp) || self.place(idx2, fp) {
            return true;
        }

        let mut rng = rand::thread_rng();
        let mut f = fp;
        let mut bucket = if rng.gen::<bool>() { idx1 } else { idx2 };
        for _ in 0..MAX_KICKS {
            let slot = rng.gen_range(0..BUCKET_SIZE);
            std::mem::swap(&mut f, &mut self.buckets[bucket][slot]);
            bucket = self.partner_index(bucket, f);
            if self.place(bucket, f) {
                return true;
            }
        }
        false
    }

    /// Remove the fingerprints of `items`. Idempotent per item: at most
    /// one matching slot is cleared for each item, so deleting an absent
    /// or already-deleted item cannot corrupt the live count.
    pub fn delete<'a, I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = &'a BigUint>,
    {
        let mut removed = 0;
        for item in items {
            let (fp, idx1, idx2) = self.fp_and_indices(item);
            if self.clear_one(idx1, fp) || self.clear_one(idx2, fp) {
                removed += 1;
            }
        }
        removed
    }

    fn clear_one(&mut self, idx: usize, fp: u16) -> bool {
        for slot in self.buckets[idx].iter_mut() {
            if *slot == fp {
                *slot = 0;
                self.n_items = self.n_items.saturating_sub(1);
                return true;
            }
        }
        false
    }

    /// Membership probe over both candidate buckets. Subject to the
    /// filter's false-positive rate.
    pub fn seek(&self, item: &BigUint) -> bool {
        let (fp, idx1, idx2) = self.fp_and_indices(item);
        self.buckets[idx1].contains(&fp) || self.buckets[idx2].contains(&fp)
    }
}

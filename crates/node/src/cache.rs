//! Disk cache for generated key material and the encrypted graph.
//!
//! Blobs are JSON: keys once per installation, ciphertexts once per
//! `(dataset, init_ratio | scale, query)` combination. Cache misses are
//! silent; corruption is treated as a miss.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use filter::RsaKeyPair;
use primitives::digest::{fr_to_hex, hex_to_fr};
use sig::BlsKeyPair;

pub struct CacheManager {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct KeyBlob {
    rsa_n: String,
    rsa_e: String,
    rsa_d: String,
    bls_sk: String,
}

fn uint_to_hex(v: &BigUint) -> String {
    v.to_str_radix(16)
}

fn uint_from_hex(s: &str) -> Option<BigUint> {
    BigUint::parse_bytes(s.as_bytes(), 16)
}

impl CacheManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating cache directory {}", dir.display()))?;
        Ok(CacheManager { dir })
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join("keys.json")
    }

    /// Ciphertext blob path for one dataset configuration.
    pub fn data_path(
        &self,
        dataset: &str,
        init_ratio: f64,
        scale: Option<usize>,
        query: &str,
    ) -> PathBuf {
        let stem = dataset.trim_end_matches(".txt");
        let name = match scale {
            Some(s) => format!("enc_{stem}_scale_{s}_q_{query}.json"),
            None if init_ratio < 1.0 => format!("enc_{stem}_stream_{init_ratio}.json"),
            None => format!("enc_{stem}_full.json"),
        };
        self.dir.join(name)
    }

    pub fn load_keys(&self) -> Option<(BlsKeyPair, RsaKeyPair)> {
        let raw = fs::read_to_string(self.key_path()).ok()?;
        let blob: KeyBlob = serde_json::from_str(&raw).ok()?;
        let rsa = RsaKeyPair {
            n: uint_from_hex(&blob.rsa_n)?,
            e: uint_from_hex(&blob.rsa_e)?,
            d: uint_from_hex(&blob.rsa_d)?,
        };
        let sk = hex_to_fr(&blob.bls_sk).ok()?;
        debug!("loaded cached key material");
        Some((BlsKeyPair::from_scalar(sk), rsa))
    }

    pub fn save_keys(&self, bls: &BlsKeyPair, rsa: &RsaKeyPair) -> Result<()> {
        let blob = KeyBlob {
            rsa_n: uint_to_hex(&rsa.n),
            rsa_e: uint_to_hex(&rsa.e),
            rsa_d: uint_to_hex(&rsa.d),
            bls_sk: fr_to_hex(&bls.sk.scalar()),
        };
        let path = self.key_path();
        fs::write(&path, serde_json::to_string_pretty(&blob)?)
            .with_context(|| format!("writing {}", path.display()))
    }

    pub fn load_ciphertexts(&self, path: &Path) -> Option<Vec<BigUint>> {
        let raw = fs::read_to_string(path).ok()?;
        let hexes: Vec<String> = serde_json::from_str(&raw).ok()?;
        let cts: Option<Vec<BigUint>> = hexes.iter().map(|h| uint_from_hex(h)).collect();
        let cts = cts?;
        debug!(n = cts.len(), "loaded cached ciphertexts");
        Some(cts)
    }

    pub fn save_ciphertexts(&self, path: &Path, cts: &[BigUint]) -> Result<()> {
        let hexes: Vec<String> = cts.iter().map(uint_to_hex).collect();
        fs::write(path, serde_json::to_string(&hexes)?)
            .with_context(|| format!("writing {}", path.display()))
    }
}

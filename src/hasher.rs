//! Named, seeded hash functions over packed k-mers.
//!
//! The pipeline's hash-mode partitioning and merge windowing both need a
//! hash that is a pure function of `(packed bits, seed)` — stable across
//! runs, processes, and machines, unlike `std`'s `SipHash` which is
//! randomly seeded per-process. Three kinds are supported; the kind in use
//! is recorded in `hash.info` alongside the partition map so a later stage
//! never has to guess which one produced a given file.

use std::hash::Hasher as _;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::kmer::Kmer;

/// Which hash function backs `hash(K, seed)` for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashKind {
    /// `rustc-hash`'s `FxHasher`, folded over the packed words.
    Fx,
    /// A `splitmix64`-style invertible 64-bit mixer.
    SplitMix64,
    /// A `wyhash`-style mixer.
    Wyhash,
}

impl HashKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fx => "fx",
            Self::SplitMix64 => "splitmix64",
            Self::Wyhash => "wyhash",
        }
    }
}

impl std::str::FromStr for HashKind {
    type Err = crate::error::KmtricksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fx" => Ok(Self::Fx),
            "splitmix64" => Ok(Self::SplitMix64),
            "wyhash" => Ok(Self::Wyhash),
            other => Err(crate::error::KmtricksError::config(format!(
                "unknown hash kind '{other}'"
            ))),
        }
    }
}

/// Hashes a k-mer's packed representation with `seed`, using `kind`.
///
/// Pure and deterministic: same `(kmer, seed, kind)` always produces the
/// same `u64`, on any machine, in any process.
#[must_use]
pub fn hash_kmer(kmer: &Kmer, seed: u64, kind: HashKind) -> u64 {
    match kind {
        HashKind::Fx => hash_fx(kmer.words(), seed),
        HashKind::SplitMix64 => hash_splitmix64(kmer.words(), seed),
        HashKind::Wyhash => hash_wyhash(kmer.words(), seed),
    }
}

fn hash_fx(words: &[u64], seed: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(seed);
    for &w in words {
        hasher.write_u64(w);
    }
    hasher.finish()
}

/// `splitmix64`: a fast, invertible, well-distributed 64-bit mixer. The
/// words of a multi-word k-mer are folded in sequentially, each combined
/// additively with the running state before the standard mix.
#[must_use]
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn hash_splitmix64(words: &[u64], seed: u64) -> u64 {
    let mut state = splitmix64(seed);
    for &w in words {
        state = splitmix64(state ^ w);
    }
    state
}

/// A `wyhash`-style mixer: 128-bit-via-`u128` multiply-xor-fold, the
/// standard construction used by the `wyhash` family.
fn wymix(a: u64, b: u64) -> u64 {
    let r = u128::from(a) * u128::from(b);
    ((r >> 64) as u64) ^ (r as u64)
}

fn hash_wyhash(words: &[u64], seed: u64) -> u64 {
    const P0: u64 = 0xA076_1D64_78BD_642F;
    const P1: u64 = 0xE703_7ED1_A0B4_28DB;
    let mut state = seed ^ P0;
    for &w in words {
        state = wymix(state ^ w, P1);
    }
    wymix(state, words.len() as u64 ^ P0)
}

/// Folds a 64-bit hash into a window `[p*W, (p+1)*W)` for partition `p` of
/// `P` total, where `W = ceil(u64::MAX / P)`. Used by hash-mode
/// partitioning to assign a k-mer to a partition without building a dense
/// minimizer table.
#[must_use]
pub fn window_for_partition(h: u64, partition: u32, num_partitions: u32) -> bool {
    let num_partitions = u64::from(num_partitions.max(1));
    let width = u64::MAX / num_partitions + 1;
    let lo = u64::from(partition).saturating_mul(width);
    let hi = lo.saturating_add(width);
    h >= lo && (h < hi || hi == 0)
}

/// Maps a hash value directly to its partition index under the window
/// scheme above.
#[must_use]
pub fn partition_of_hash(h: u64, num_partitions: u32) -> u32 {
    let num_partitions = u64::from(num_partitions.max(1));
    let width = u64::MAX / num_partitions + 1;
    u32::try_from(h / width).unwrap_or(u32::try_from(num_partitions - 1).unwrap_or(u32::MAX))
}

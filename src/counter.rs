//! Per-(sample, partition) k-mer counting.
//!
//! Reconstructs every k-mer from a partition's super-k-mers, aggregates
//! counts, applies the per-sample abundance floor and saturation ceiling,
//! accumulates a histogram, and emits a sorted output in one of three
//! modes (k-mer, hash, or presence vector).

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::Path;

use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

use crate::codec::{decode_delta_ascending, decode_delta_zigzag, encode_delta_ascending, encode_delta_zigzag, lz4_compress, lz4_decompress};
use crate::count::{CountSlot, CountWidth};
use crate::error::KmtricksError;
use crate::format_file::{FileHeader, FileKind};
use crate::hasher::{hash_kmer, HashKind};
use crate::histogram::Histogram;
use crate::kmer::Kmer;
use crate::partition_map::partition_slot;
use crate::rundir::content_window;
use crate::superk::SuperKmer;

type FxMap<K, V> = HashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Which in-memory counting approach to use, selected once at configure
/// time from the estimated distinct-k-mer count and RAM budget, never
/// per-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountingStrategy {
    /// Open-addressing hash map; fast as long as the working set fits RAM.
    DenseHashMap,
    /// Sort the packed k-mer array, then run-length aggregate; used when
    /// the distinct-k-mer estimate exceeds the per-worker RAM budget.
    SortThenAggregate,
}

/// Picks a strategy from an estimated distinct-k-mer count, the
/// per-worker RAM budget, and the per-entry memory cost of the dense map.
#[must_use]
pub fn choose_strategy(estimated_distinct_kmers: u64, ram_budget_bytes: u64, bytes_per_entry: u64) -> CountingStrategy {
    let estimated_bytes = estimated_distinct_kmers.saturating_mul(bytes_per_entry.max(1));
    if estimated_bytes <= ram_budget_bytes {
        CountingStrategy::DenseHashMap
    } else {
        CountingStrategy::SortThenAggregate
    }
}

/// Reconstructs every k-mer from a slice of super-k-mers and aggregates
/// canonical-k-mer counts, sorted ascending by key (the partition-file
/// ordering invariant).
#[must_use]
pub fn count_kmers(superkmers: &[SuperKmer], k: usize, strategy: CountingStrategy) -> BTreeMap<Kmer, u64> {
    match strategy {
        CountingStrategy::DenseHashMap => {
            let mut map: FxMap<Kmer, u64> = FxMap::default();
            for sk in superkmers {
                for window in sk.kmers(k) {
                    if let Ok(kmer) = Kmer::encode(window, k) {
                        *map.entry(kmer.canonical()).or_insert(0) += 1;
                    }
                }
            }
            map.into_iter().collect()
        }
        CountingStrategy::SortThenAggregate => {
            let mut all: Vec<Kmer> = Vec::new();
            for sk in superkmers {
                for window in sk.kmers(k) {
                    if let Ok(kmer) = Kmer::encode(window, k) {
                        all.push(kmer.canonical());
                    }
                }
            }
            all.sort_unstable();
            let mut out = BTreeMap::new();
            let mut iter = all.into_iter().peekable();
            while let Some(kmer) = iter.next() {
                let mut count = 1u64;
                while iter.peek() == Some(&kmer) {
                    iter.next();
                    count += 1;
                }
                out.insert(kmer, count);
            }
            out
        }
    }
}

/// Converts k-mer-keyed counts into hash-mode keys
/// (`hash(K, seed) mod W + slot*W`), summing colliding hashes. Accepted
/// lossy semantics: distinct k-mers that collide are indistinguishable
/// downstream. `partition` may be [`crate::partition_map::DEFAULT_MINIMIZER`]
/// (the overflow bucket), which [`partition_slot`] maps to its own bounded
/// slot rather than using it as a raw index.
#[must_use]
pub fn count_kmers_to_hashes(
    counts: &BTreeMap<Kmer, u64>,
    seed: u64,
    kind: HashKind,
    partition: u32,
    num_partitions: u32,
) -> BTreeMap<u64, u64> {
    let window = content_window(num_partitions);
    let base = u64::from(partition_slot(partition, num_partitions)).saturating_mul(window);
    let mut out: BTreeMap<u64, u64> = BTreeMap::new();
    for (kmer, count) in counts {
        let h = hash_kmer(kmer, seed, kind);
        let windowed = base.saturating_add(h % window);
        *out.entry(windowed).or_insert(0) += count;
    }
    out
}

/// One filtered, saturated output entry plus whether it survived the
/// abundance-min floor.
fn finalize(raw_count: u64, abundance_min: u32, max_c: u32) -> (CountSlot, bool) {
    let slot = CountSlot::saturating(raw_count, max_c);
    let survives = raw_count >= u64::from(abundance_min);
    (slot, survives)
}

/// Applies the per-sample abundance floor and saturation ceiling to a
/// sorted k-mer count map, recording every distinct k-mer (before
/// thresholding) into `histogram` if provided.
#[must_use]
pub fn filter_and_saturate_kmers(
    counts: &BTreeMap<Kmer, u64>,
    abundance_min: u32,
    max_c: u32,
    histogram: Option<&mut Histogram>,
) -> Vec<(Kmer, CountSlot)> {
    let mut out = Vec::new();
    let mut histogram = histogram;
    for (kmer, &raw_count) in counts {
        let (slot, survives) = finalize(raw_count, abundance_min, max_c);
        if let Some(hist) = histogram.as_deref_mut() {
            hist.record(slot.get());
        }
        if survives {
            out.push((kmer.clone(), slot));
        }
    }
    out
}

/// Hash-mode counterpart of [`filter_and_saturate_kmers`].
#[must_use]
pub fn filter_and_saturate_hashes(
    counts: &BTreeMap<u64, u64>,
    abundance_min: u32,
    max_c: u32,
    histogram: Option<&mut Histogram>,
) -> Vec<(u64, CountSlot)> {
    let mut out = Vec::new();
    let mut histogram = histogram;
    for (&hash, &raw_count) in counts {
        let (slot, survives) = finalize(raw_count, abundance_min, max_c);
        if let Some(hist) = histogram.as_deref_mut() {
            hist.record(slot.get());
        }
        if survives {
            out.push((hash, slot));
        }
    }
    out
}

/// A dense bitset of length `len`, one bit per hash value in a partition's
/// hash window, used for vector-mode output and Bloom filter assembly.
#[derive(Debug, Clone)]
pub struct BitVector {
    bits: Vec<u8>,
    len: u64,
}

impl BitVector {
    #[must_use]
    pub fn zeros(len: u64) -> Self {
        Self {
            bits: vec![0u8; (len as usize).div_ceil(8)],
            len,
        }
    }

    /// Rebuilds a bitset from raw bytes, e.g. ones read off disk.
    #[must_use]
    pub fn from_raw(bits: Vec<u8>, len: u64) -> Self {
        Self { bits, len }
    }

    pub fn set(&mut self, index: u64) {
        debug_assert!(index < self.len);
        let byte = (index / 8) as usize;
        let bit = (index % 8) as u8;
        self.bits[byte] |= 1 << bit;
    }

    #[must_use]
    pub fn get(&self, index: u64) -> bool {
        let byte = (index / 8) as usize;
        let bit = (index % 8) as u8;
        (self.bits[byte] >> bit) & 1 == 1
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Builds the vector-mode bitset: bit `(hash - slot*W)` set iff the hash's
/// count passed the abundance-min floor. `partition` is mapped through
/// [`partition_slot`] the same way [`count_kmers_to_hashes`] mapped it when
/// producing `hash_counts`, so the two agree on `base`.
#[must_use]
pub fn build_vector(hash_counts: &[(u64, CountSlot)], partition: u32, num_partitions: u32, window: u64) -> BitVector {
    let base = u64::from(partition_slot(partition, num_partitions)).saturating_mul(window);
    let mut bits = BitVector::zeros(window);
    for &(hash, _) in hash_counts {
        bits.set(hash.saturating_sub(base));
    }
    bits
}

/// Writes a k-mer-mode count file: the shared [`FileHeader`], then one
/// uncompressed `(packed k-mer, count)` record per entry. Optional LZ4
/// wraps the whole record stream rather than per-record, matching the
/// super-k-mer writer's block-at-a-time approach.
///
/// # Errors
///
/// Returns [`KmtricksError::Io`] on a write failure.
pub fn write_kmer_count_file<W: Write>(
    mut w: W,
    entries: &[(Kmer, CountSlot)],
    width: CountWidth,
    compress: bool,
    path: &Path,
) -> Result<(), KmtricksError> {
    FileHeader::new(FileKind::Kmer, compress).write_to(&mut w, path)?;
    let mut body = Vec::new();
    for (kmer, slot) in entries {
        let words = kmer.words();
        body.extend_from_slice(&(kmer.k() as u32).to_le_bytes());
        for word in words {
            body.extend_from_slice(&word.to_le_bytes());
        }
        slot.write_to(width, &mut body)?;
    }
    let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
    if compress {
        w.write_all(&lz4_compress(&body)?).map_err(io)
    } else {
        w.write_all(&body).map_err(io)
    }
}

/// Reads back a file written by [`write_kmer_count_file`].
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] if the header or a record is
/// malformed, or [`KmtricksError::Io`] on a read failure.
pub fn read_kmer_count_file<R: Read>(mut r: R, width: CountWidth, path: &Path) -> Result<Vec<(Kmer, CountSlot)>, KmtricksError> {
    let header = FileHeader::read_from(&mut r, path)?;
    if header.kind != FileKind::Kmer {
        return Err(KmtricksError::format("not a kmer count file", path.to_path_buf()));
    }
    let mut raw = Vec::new();
    r.read_to_end(&mut raw).map_err(|e| KmtricksError::io(e, path.to_path_buf()))?;
    let body = if header.compressed { lz4_decompress(&raw)? } else { raw };

    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        let k_bytes = body
            .get(pos..pos + 4)
            .ok_or_else(|| KmtricksError::format("truncated kmer record", path.to_path_buf()))?;
        let k = u32::from_le_bytes(k_bytes.try_into().unwrap()) as usize;
        pos += 4;
        let word_count = crate::kmer::words_for_k(k);
        let mut words = Vec::with_capacity(word_count);
        for _ in 0..word_count {
            let w_bytes = body
                .get(pos..pos + 8)
                .ok_or_else(|| KmtricksError::format("truncated kmer word", path.to_path_buf()))?;
            words.push(u64::from_le_bytes(w_bytes.try_into().unwrap()));
            pos += 8;
        }
        let slot = CountSlot::read_from(&body, &mut pos, width)?;
        out.push((Kmer::from_words(k, words.into_boxed_slice()), slot));
    }
    Ok(out)
}

/// Writes a hash-mode count file: the shared header, then one compressed
/// block of `u64 n | hash bytes (delta+varint) | count bytes
/// (delta+zigzag+varint)`.
///
/// # Errors
///
/// Returns [`KmtricksError::Io`] on a write failure.
pub fn write_hash_count_file<W: Write>(mut w: W, entries: &[(u64, CountSlot)], path: &Path) -> Result<(), KmtricksError> {
    FileHeader::new(FileKind::Hash, true).write_to(&mut w, path)?;
    let hashes: Vec<u64> = entries.iter().map(|(h, _)| *h).collect();
    let counts: Vec<u32> = entries.iter().map(|(_, c)| c.get()).collect();
    let hash_bytes = encode_delta_ascending(&hashes);
    let count_bytes = encode_delta_zigzag(&counts);

    let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
    w.write_all(&(entries.len() as u64).to_le_bytes()).map_err(io)?;
    w.write_all(&(hash_bytes.len() as u64).to_le_bytes()).map_err(io)?;
    w.write_all(&hash_bytes).map_err(io)?;
    w.write_all(&(count_bytes.len() as u64).to_le_bytes()).map_err(io)?;
    w.write_all(&count_bytes).map_err(io)
}

/// Reads back a file written by [`write_hash_count_file`].
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] if the header or block is malformed,
/// or [`KmtricksError::Io`] on a read failure.
pub fn read_hash_count_file<R: Read>(mut r: R, path: &Path) -> Result<Vec<(u64, CountSlot)>, KmtricksError> {
    let header = FileHeader::read_from(&mut r, path)?;
    if header.kind != FileKind::Hash {
        return Err(KmtricksError::format("not a hash count file", path.to_path_buf()));
    }
    let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
    let read_u64 = |r: &mut R| -> Result<u64, KmtricksError> {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf).map_err(io)?;
        Ok(u64::from_le_bytes(buf))
    };

    let n = read_u64(&mut r)? as usize;
    let hash_len = read_u64(&mut r)? as usize;
    let mut hash_bytes = vec![0u8; hash_len];
    r.read_exact(&mut hash_bytes).map_err(io)?;
    let count_len = read_u64(&mut r)? as usize;
    let mut count_bytes = vec![0u8; count_len];
    r.read_exact(&mut count_bytes).map_err(io)?;

    let hashes = decode_delta_ascending(&hash_bytes, n)?;
    let counts = decode_delta_zigzag(&count_bytes, n)?;
    Ok(hashes.into_iter().zip(counts).map(|(h, c)| (h, CountSlot::from_raw(c))).collect())
}

/// Writes a vector-mode presence bitset file.
///
/// # Errors
///
/// Returns [`KmtricksError::Io`] on a write failure.
pub fn write_vector_file<W: Write>(mut w: W, vector: &BitVector, path: &Path) -> Result<(), KmtricksError> {
    FileHeader::new(FileKind::Vector, false).write_to(&mut w, path)?;
    let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
    w.write_all(&vector.len().to_le_bytes()).map_err(io)?;
    w.write_all(vector.as_bytes()).map_err(io)
}

/// Reads back a file written by [`write_vector_file`].
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] if the header is wrong, or
/// [`KmtricksError::Io`] on a read failure.
pub fn read_vector_file<R: Read>(mut r: R, path: &Path) -> Result<BitVector, KmtricksError> {
    let header = FileHeader::read_from(&mut r, path)?;
    if header.kind != FileKind::Vector {
        return Err(KmtricksError::format("not a vector file", path.to_path_buf()));
    }
    let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
    let mut len_buf = [0u8; 8];
    r.read_exact(&mut len_buf).map_err(io)?;
    let len = u64::from_le_bytes(len_buf);
    let mut bits = vec![0u8; (len as usize).div_ceil(8)];
    r.read_exact(&mut bits).map_err(io)?;
    Ok(BitVector::from_raw(bits, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kmer(seq: &str) -> Kmer {
        Kmer::encode(seq.as_bytes(), seq.len()).unwrap()
    }

    fn superkmer_from(seq: &str) -> SuperKmer {
        SuperKmer {
            bases: seq.as_bytes().to_vec(),
            count: u8::try_from(seq.len() - 3).unwrap(),
        }
    }

    #[test]
    fn dense_and_sort_strategies_agree() {
        let sk = superkmer_from("ACGTACGTACGT");
        let dense = count_kmers(&[sk.clone()], 4, CountingStrategy::DenseHashMap);
        let sorted = count_kmers(&[sk], 4, CountingStrategy::SortThenAggregate);
        assert_eq!(dense, sorted);
    }

    #[test]
    fn counts_are_canonical() {
        let sk = SuperKmer {
            bases: b"ACGT".to_vec(),
            count: 1,
        };
        let counts = count_kmers(&[sk], 4, CountingStrategy::DenseHashMap);
        let canon = kmer("ACGT").canonical();
        assert_eq!(counts.get(&canon), Some(&1));
    }

    #[test]
    fn saturation_clamps_at_max_c() {
        let mut counts = BTreeMap::new();
        counts.insert(kmer("ACGT"), 300);
        let filtered = filter_and_saturate_kmers(&counts, 1, 255, None);
        assert_eq!(filtered[0].1.get(), 255);
    }

    #[test]
    fn abundance_min_drops_low_count_entries() {
        let mut counts = BTreeMap::new();
        counts.insert(kmer("ACGT"), 1);
        counts.insert(kmer("TTTT"), 5);
        let filtered = filter_and_saturate_kmers(&counts, 3, 255, None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].0, kmer("TTTT"));
    }

    #[test]
    fn histogram_records_before_thresholding() {
        let mut counts = BTreeMap::new();
        counts.insert(kmer("ACGT"), 1);
        counts.insert(kmer("TTTT"), 5);
        let mut hist = Histogram::new(1, 10);
        let filtered = filter_and_saturate_kmers(&counts, 3, 255, Some(&mut hist));
        assert_eq!(filtered.len(), 1);
        assert_eq!(hist.unique_at(1), 1);
        assert_eq!(hist.unique_at(5), 1);
    }

    #[test]
    fn choose_strategy_picks_sort_when_over_budget() {
        assert_eq!(
            choose_strategy(1_000_000, 1_000, 64),
            CountingStrategy::SortThenAggregate
        );
        assert_eq!(
            choose_strategy(10, 1_000_000, 64),
            CountingStrategy::DenseHashMap
        );
    }

    #[test]
    fn hash_mode_sums_colliding_hashes() {
        let mut counts = BTreeMap::new();
        counts.insert(kmer("ACGT"), 3);
        counts.insert(kmer("TTTT"), 4);
        let hashes = count_kmers_to_hashes(&counts, 0, HashKind::Fx, 0, 4);
        let total: u64 = hashes.values().sum();
        assert_eq!(total, 7);
    }

    #[test]
    fn bit_vector_round_trips() {
        let mut bv = BitVector::zeros(100);
        bv.set(5);
        bv.set(99);
        assert!(bv.get(5));
        assert!(bv.get(99));
        assert!(!bv.get(6));
    }

    #[test]
    fn kmer_count_file_round_trips() {
        let entries = vec![(kmer("ACGT"), CountSlot::saturating(5, 255)), (kmer("TTTT"), CountSlot::saturating(9, 255))];
        let mut buf = Vec::new();
        write_kmer_count_file(&mut buf, &entries, CountWidth::U8, false, Path::new("x")).unwrap();
        let restored = read_kmer_count_file(std::io::Cursor::new(buf), CountWidth::U8, Path::new("x")).unwrap();
        assert_eq!(restored, entries);
    }

    #[test]
    fn kmer_count_file_round_trips_compressed() {
        let entries = vec![(kmer("ACGT"), CountSlot::saturating(5, 255))];
        let mut buf = Vec::new();
        write_kmer_count_file(&mut buf, &entries, CountWidth::U8, true, Path::new("x")).unwrap();
        let restored = read_kmer_count_file(std::io::Cursor::new(buf), CountWidth::U8, Path::new("x")).unwrap();
        assert_eq!(restored, entries);
    }

    #[test]
    fn hash_count_file_round_trips() {
        let entries = vec![(10u64, CountSlot::saturating(3, 255)), (20, CountSlot::saturating(7, 255))];
        let mut buf = Vec::new();
        write_hash_count_file(&mut buf, &entries, Path::new("x")).unwrap();
        let restored = read_hash_count_file(std::io::Cursor::new(buf), Path::new("x")).unwrap();
        assert_eq!(restored, entries);
    }

    #[test]
    fn vector_file_round_trips() {
        let mut bv = BitVector::zeros(40);
        bv.set(3);
        bv.set(39);
        let mut buf = Vec::new();
        write_vector_file(&mut buf, &bv, Path::new("x")).unwrap();
        let restored = read_vector_file(std::io::Cursor::new(buf), Path::new("x")).unwrap();
        assert!(restored.get(3));
        assert!(restored.get(39));
        assert!(!restored.get(4));
    }

    #[test]
    fn build_vector_sets_offset_bits() {
        let window = 1000u64;
        let partition = 2u32;
        let num_partitions = 4u32;
        let base = u64::from(partition) * window;
        let entries = vec![(base + 10, CountSlot::saturating(5, 255))];
        let bv = build_vector(&entries, partition, num_partitions, window);
        assert!(bv.get(10));
        assert!(!bv.get(11));
    }

    #[test]
    fn build_vector_maps_overflow_partition_without_overflow_panic() {
        use crate::partition_map::DEFAULT_MINIMIZER;
        let num_partitions = 2u32;
        let window = content_window(num_partitions);
        let entries = vec![(window * 2 + 5, CountSlot::saturating(3, 255))];
        let bv = build_vector(&entries, DEFAULT_MINIMIZER, num_partitions, window);
        assert!(bv.get(5));
    }

    #[test]
    fn count_kmers_to_hashes_handles_overflow_partition() {
        use crate::partition_map::DEFAULT_MINIMIZER;
        let mut counts = BTreeMap::new();
        counts.insert(kmer("ACGT"), 3);
        let hashes = count_kmers_to_hashes(&counts, 0, HashKind::Fx, DEFAULT_MINIMIZER, 2);
        assert_eq!(hashes.values().sum::<u64>(), 3);
    }
}

//! Deterministic minimizer → partition mapping, serialized to disk.
//!
//! A `PartitionMap` is a total function from every possible canonical
//! `m`-mer (addressed by its packed integer value) to a partition id in
//! `[0, P)`. It is built once per run from a frequency sample of the
//! input, then immutable and freely shared across every counting and
//! splitting task.
//!
//! The table is dense — one `u16` slot per possible `m`-mer — which trades
//! memory for O(1), branch-free lookup. At `m=15` this is `4^15 * 2` bytes
//! (~2 GiB), so runs in that regime should keep `m` small; this mirrors the
//! practical guidance of the system this pipeline reimplements, which also
//! recommends `m <= 12` for dense tables.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::KmtricksError;
use crate::format_file::{FileHeader, FileKind};
use crate::kmer::Kmer;

/// Sentinel partition id for minimizers disallowed by the `AA`-inside rule.
/// Routed to a dedicated overflow partition rather than any content-derived
/// bucket.
pub const DEFAULT_MINIMIZER: u32 = u32::MAX;

/// Corruption-detection magic bracketing each serialized table.
const TABLE_MAGIC: u32 = 0x1234_5678;

/// How minimizers are assigned to partitions at `repart` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionPolicy {
    /// Minimizers sorted by decreasing observed frequency, then distributed
    /// round-robin across partitions. Balances expected load per partition.
    Unordered,
    /// Minimizers sorted lexicographically and chunked into `P` contiguous
    /// ranges. Cheaper to build; uneven load if minimizer frequency skews.
    Ordered,
}

/// Maps a routed partition id to a bounded slot index: `DEFAULT_MINIMIZER`
/// becomes the dedicated slot just past the content partitions
/// (`num_partitions`) instead of `u32::MAX`, so arithmetic that scales a
/// slot index by a hash window never multiplies by a value four billion
/// times too large.
#[must_use]
pub fn partition_slot(partition: u32, num_partitions: u32) -> u32 {
    if partition == DEFAULT_MINIMIZER {
        num_partitions.max(1)
    } else {
        partition
    }
}

/// The minimizer → partition mapping for one run.
#[derive(Debug, Clone)]
pub struct PartitionMap {
    m: usize,
    num_partitions: u32,
    /// Dense table indexed by a canonical `m`-mer's packed integer value.
    table: Vec<u16>,
    /// Overflow partition for minimizers that were never sampled (and so
    /// never assigned): falls back to `address % num_partitions`.
    unsampled_fallback: bool,
    /// Per-minimizer observed sampling frequency, parallel to `table`
    /// (`freq_order[addr]` is the count `addr` was seen at repart time, or
    /// 0 if unsampled). `None` when the map was built without a frequency
    /// sample to record.
    freq_order: Option<Vec<u32>>,
}

impl PartitionMap {
    /// Builds a partition map from `(minimizer, frequency)` samples using
    /// `policy`. Minimizers absent from `frequencies` still resolve via a
    /// deterministic fallback: `address % num_partitions`.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Config`] if `num_partitions` is zero.
    pub fn build(
        m: usize,
        num_partitions: u32,
        frequencies: &HashMap<u64, u64>,
        policy: PartitionPolicy,
    ) -> Result<Self, KmtricksError> {
        if num_partitions == 0 {
            return Err(KmtricksError::config("num_partitions must be > 0"));
        }
        let table_len = 1usize << (2 * m);
        let mut table = vec![u16::MAX; table_len];

        let mut addresses: Vec<u64> = frequencies.keys().copied().collect();
        match policy {
            PartitionPolicy::Unordered => {
                addresses.sort_unstable_by(|a, b| {
                    frequencies[b]
                        .cmp(&frequencies[a])
                        .then_with(|| a.cmp(b))
                });
                for (i, addr) in addresses.iter().enumerate() {
                    let p = (i as u32) % num_partitions;
                    table[*addr as usize] = u16::try_from(p).unwrap_or(u16::MAX);
                }
            }
            PartitionPolicy::Ordered => {
                addresses.sort_unstable();
                let n = addresses.len().max(1);
                for (i, addr) in addresses.iter().enumerate() {
                    let p = ((i * num_partitions as usize) / n) as u32;
                    let p = p.min(num_partitions - 1);
                    table[*addr as usize] = u16::try_from(p).unwrap_or(u16::MAX);
                }
            }
        }

        let mut freq_order = vec![0u32; table_len];
        for (&addr, &freq) in frequencies {
            freq_order[addr as usize] = u32::try_from(freq).unwrap_or(u32::MAX);
        }

        Ok(Self {
            m,
            num_partitions,
            table,
            unsampled_fallback: true,
            freq_order: Some(freq_order),
        })
    }

    #[must_use]
    pub const fn m(&self) -> usize {
        self.m
    }

    #[must_use]
    pub const fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    /// The per-minimizer frequency sample recorded at build time, if any.
    #[must_use]
    pub fn freq_order(&self) -> Option<&[u32]> {
        self.freq_order.as_deref()
    }

    fn address_of(&self, minimizer: &Kmer) -> u64 {
        debug_assert_eq!(minimizer.k(), self.m);
        minimizer.words()[minimizer.words().len() - 1]
    }

    /// Returns the partition id for a canonical minimizer, or
    /// [`DEFAULT_MINIMIZER`]'s routed partition if the minimizer was never
    /// sampled and fallback is disabled.
    #[must_use]
    pub fn partition_of(&self, minimizer: &Kmer) -> u32 {
        self.partition_of_address(self.address_of(minimizer))
    }

    /// [`Self::partition_of`], addressed directly by packed minimizer value
    /// rather than a [`Kmer`] (used when replaying a frequency sample that
    /// only recorded addresses).
    #[must_use]
    pub fn partition_of_address(&self, addr: u64) -> u32 {
        let slot = self.table[addr as usize];
        if slot == u16::MAX {
            if self.unsampled_fallback {
                u32::try_from(addr % u64::from(self.num_partitions)).unwrap_or(0)
            } else {
                DEFAULT_MINIMIZER
            }
        } else {
            u32::from(slot)
        }
    }

    /// Serializes the table with a `0x12345678` magic at both header and
    /// footer, so a reader can detect truncation or corruption without
    /// scanning the whole body first. An optional frequency-order table
    /// (one `u32` per minimizer, parallel to the partition table) follows
    /// the main table, bracketed by the same magic, when [`Self::build`]
    /// recorded one.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] on a write failure.
    pub fn serialize<W: Write>(&self, mut w: W, path: &Path) -> Result<(), KmtricksError> {
        let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
        w.write_all(&TABLE_MAGIC.to_le_bytes()).map_err(io)?;
        w.write_all(&(self.m as u32).to_le_bytes()).map_err(io)?;
        w.write_all(&self.num_partitions.to_le_bytes()).map_err(io)?;
        w.write_all(&(self.table.len() as u64).to_le_bytes())
            .map_err(io)?;
        for &slot in &self.table {
            w.write_all(&slot.to_le_bytes()).map_err(io)?;
        }
        w.write_all(&[u8::from(self.unsampled_fallback)])
            .map_err(io)?;
        w.write_all(&TABLE_MAGIC.to_le_bytes()).map_err(io)?;

        w.write_all(&[u8::from(self.freq_order.is_some())])
            .map_err(io)?;
        if let Some(freq_order) = &self.freq_order {
            for &freq in freq_order {
                w.write_all(&freq.to_le_bytes()).map_err(io)?;
            }
            w.write_all(&TABLE_MAGIC.to_le_bytes()).map_err(io)?;
        }
        Ok(())
    }

    /// Deserializes a table written by [`Self::serialize`], checking both
    /// magics.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Format`] if either magic fails to match or
    /// the body is truncated, or [`KmtricksError::Io`] on a read failure.
    pub fn deserialize<R: Read>(mut r: R, path: &Path) -> Result<Self, KmtricksError> {
        let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
        let fmt = |details: String| KmtricksError::format(details, path.to_path_buf());

        let mut u32buf = [0u8; 4];
        r.read_exact(&mut u32buf).map_err(io)?;
        let header_magic = u32::from_le_bytes(u32buf);
        if header_magic != TABLE_MAGIC {
            return Err(fmt(format!("bad partition map header magic {header_magic:#x}")));
        }

        r.read_exact(&mut u32buf).map_err(io)?;
        let m = u32::from_le_bytes(u32buf) as usize;

        r.read_exact(&mut u32buf).map_err(io)?;
        let num_partitions = u32::from_le_bytes(u32buf);

        let mut u64buf = [0u8; 8];
        r.read_exact(&mut u64buf).map_err(io)?;
        let len = u64::from_le_bytes(u64buf) as usize;

        let mut table = Vec::with_capacity(len);
        let mut slot_buf = [0u8; 2];
        for _ in 0..len {
            r.read_exact(&mut slot_buf).map_err(io)?;
            table.push(u16::from_le_bytes(slot_buf));
        }

        let mut flag_buf = [0u8; 1];
        r.read_exact(&mut flag_buf).map_err(io)?;
        let unsampled_fallback = flag_buf[0] != 0;

        r.read_exact(&mut u32buf).map_err(io)?;
        let footer_magic = u32::from_le_bytes(u32buf);
        if footer_magic != TABLE_MAGIC {
            return Err(fmt(format!("bad partition map footer magic {footer_magic:#x}")));
        }

        r.read_exact(&mut flag_buf).map_err(io)?;
        let has_freq_order = flag_buf[0] != 0;
        let freq_order = if has_freq_order {
            let mut freq = Vec::with_capacity(len);
            let mut freq_buf = [0u8; 4];
            for _ in 0..len {
                r.read_exact(&mut freq_buf).map_err(io)?;
                freq.push(u32::from_le_bytes(freq_buf));
            }
            r.read_exact(&mut u32buf).map_err(io)?;
            let freq_magic = u32::from_le_bytes(u32buf);
            if freq_magic != TABLE_MAGIC {
                return Err(fmt(format!("bad frequency-order footer magic {freq_magic:#x}")));
            }
            Some(freq)
        } else {
            None
        };

        Ok(Self {
            m,
            num_partitions,
            table,
            unsampled_fallback,
            freq_order,
        })
    }
}

/// Writes a partition's `minimizers/minimizers.<p>` artifact: the shared
/// header, then the partition's addresses as little-endian `u64`s,
/// ascending.
///
/// # Errors
///
/// Returns [`KmtricksError::Io`] on a write failure.
pub fn write_minimizers_file<W: Write>(mut w: W, addresses: &[u64], path: &Path) -> Result<(), KmtricksError> {
    FileHeader::new(FileKind::Minimizers, false).write_to(&mut w, path)?;
    let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
    for &addr in addresses {
        w.write_all(&addr.to_le_bytes()).map_err(io)?;
    }
    Ok(())
}

/// Reads back a file written by [`write_minimizers_file`].
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] if the header is wrong, or
/// [`KmtricksError::Io`] on a read failure.
pub fn read_minimizers_file<R: Read>(mut r: R, path: &Path) -> Result<Vec<u64>, KmtricksError> {
    let header = FileHeader::read_from(&mut r, path)?;
    if header.kind != FileKind::Minimizers {
        return Err(KmtricksError::format("not a minimizers file", path.to_path_buf()));
    }
    let mut raw = Vec::new();
    r.read_to_end(&mut raw).map_err(|e| KmtricksError::io(e, path.to_path_buf()))?;
    if raw.len() % 8 != 0 {
        return Err(KmtricksError::format("truncated minimizer address", path.to_path_buf()));
    }
    Ok(raw.chunks_exact(8).map(|b| u64::from_le_bytes(b.try_into().unwrap())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_frequencies(m: usize) -> HashMap<u64, u64> {
        let mut freqs = HashMap::new();
        for seq in ["ACGT", "AACC", "CCGG", "TTAA", "GGCC"] {
            if seq.len() != m {
                continue;
            }
            let mmer = Kmer::encode(seq.as_bytes(), m).unwrap().canonical();
            let addr = mmer.words()[mmer.words().len() - 1];
            *freqs.entry(addr).or_insert(0) += 1;
        }
        freqs
    }

    #[test]
    fn partition_of_stays_in_range() {
        let freqs = sample_frequencies(4);
        let map = PartitionMap::build(4, 8, &freqs, PartitionPolicy::Unordered).unwrap();
        for seq in ["ACGT", "AACC", "CCGG", "TTAA", "GGCC", "TTTT"] {
            let mmer = Kmer::encode(seq.as_bytes(), 4).unwrap().canonical();
            assert!(map.partition_of(&mmer) < 8);
        }
    }

    #[test]
    fn ordered_policy_is_deterministic() {
        let freqs = sample_frequencies(4);
        let a = PartitionMap::build(4, 4, &freqs, PartitionPolicy::Ordered).unwrap();
        let b = PartitionMap::build(4, 4, &freqs, PartitionPolicy::Ordered).unwrap();
        for seq in ["ACGT", "AACC", "CCGG"] {
            let mmer = Kmer::encode(seq.as_bytes(), 4).unwrap().canonical();
            assert_eq!(a.partition_of(&mmer), b.partition_of(&mmer));
        }
    }

    #[test]
    fn rejects_zero_partitions() {
        let freqs = sample_frequencies(4);
        assert!(PartitionMap::build(4, 0, &freqs, PartitionPolicy::Unordered).is_err());
    }

    #[test]
    fn serialize_round_trips() {
        let freqs = sample_frequencies(4);
        let map = PartitionMap::build(4, 4, &freqs, PartitionPolicy::Unordered).unwrap();
        let mut buf = Vec::new();
        map.serialize(&mut buf, Path::new("repartition/map.bin")).unwrap();
        let restored = PartitionMap::deserialize(Cursor::new(buf), Path::new("repartition/map.bin")).unwrap();
        assert_eq!(restored.m(), map.m());
        assert_eq!(restored.num_partitions(), map.num_partitions());
        for seq in ["ACGT", "AACC", "CCGG"] {
            let mmer = Kmer::encode(seq.as_bytes(), 4).unwrap().canonical();
            assert_eq!(map.partition_of(&mmer), restored.partition_of(&mmer));
        }
    }

    #[test]
    fn serialize_round_trips_freq_order() {
        let freqs = sample_frequencies(4);
        let map = PartitionMap::build(4, 4, &freqs, PartitionPolicy::Unordered).unwrap();
        let mut buf = Vec::new();
        map.serialize(&mut buf, Path::new("x")).unwrap();
        let restored = PartitionMap::deserialize(Cursor::new(buf), Path::new("x")).unwrap();
        assert_eq!(restored.freq_order(), map.freq_order());
        assert!(restored.freq_order().is_some());

        let acgt = Kmer::encode(b"ACGT", 4).unwrap().canonical();
        let addr = acgt.words()[acgt.words().len() - 1];
        assert_eq!(restored.freq_order().unwrap()[addr as usize], 1);
    }

    #[test]
    fn partition_of_address_agrees_with_partition_of() {
        let freqs = sample_frequencies(4);
        let map = PartitionMap::build(4, 4, &freqs, PartitionPolicy::Unordered).unwrap();
        for seq in ["ACGT", "AACC", "CCGG", "TTTT"] {
            let mmer = Kmer::encode(seq.as_bytes(), 4).unwrap().canonical();
            let addr = mmer.words()[mmer.words().len() - 1];
            assert_eq!(map.partition_of(&mmer), map.partition_of_address(addr));
        }
    }

    #[test]
    fn partition_slot_maps_overflow_to_dedicated_index() {
        assert_eq!(partition_slot(DEFAULT_MINIMIZER, 4), 4);
        assert_eq!(partition_slot(2, 4), 2);
    }

    #[test]
    fn minimizers_file_round_trips() {
        let addrs = vec![3u64, 17, 4096];
        let mut buf = Vec::new();
        write_minimizers_file(&mut buf, &addrs, Path::new("x")).unwrap();
        let restored = read_minimizers_file(Cursor::new(buf), Path::new("x")).unwrap();
        assert_eq!(restored, addrs);
    }

    #[test]
    fn deserialize_rejects_corrupt_header_magic() {
        let freqs = sample_frequencies(4);
        let map = PartitionMap::build(4, 4, &freqs, PartitionPolicy::Unordered).unwrap();
        let mut buf = Vec::new();
        map.serialize(&mut buf, Path::new("x")).unwrap();
        buf[0] ^= 0xff;
        let err = PartitionMap::deserialize(Cursor::new(buf), Path::new("x")).unwrap_err();
        assert!(matches!(err, KmtricksError::Format { .. }));
    }

    #[test]
    fn deserialize_rejects_corrupt_footer_magic() {
        let freqs = sample_frequencies(4);
        let map = PartitionMap::build(4, 4, &freqs, PartitionPolicy::Unordered).unwrap();
        let mut buf = Vec::new();
        map.serialize(&mut buf, Path::new("x")).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        let err = PartitionMap::deserialize(Cursor::new(buf), Path::new("x")).unwrap_err();
        assert!(matches!(err, KmtricksError::Format { .. }));
    }
}

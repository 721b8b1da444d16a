//! Super-k-mer extraction and per-partition block writing.
//!
//! Per sample, per thread: walks a sequence's k-mers, groups maximal runs
//! that share a minimizer's partition into super-k-mers, and writes each
//! to its target partition's block stream. The splitting logic
//! (`split_sequence`) is a pure function over a byte slice so it can be
//! tested without any file I/O; [`SuperkWriter`] handles the buffering and
//! block framing around it.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::codec::{lz4_compress, lz4_decompress};
use crate::error::KmtricksError;
use crate::format_file::{FileHeader, FileKind};
use crate::kmer::Kmer;
use crate::partition_map::{PartitionMap, DEFAULT_MINIMIZER};

/// Default in-memory buffer size per partition before a block is flushed.
pub const DEFAULT_BLOCK_CAPACITY: usize = 32 * 1024;

/// A maximal run of consecutive k-mers sharing one minimizer's partition,
/// stored in original forward orientation (not pre-canonicalized — only
/// the original sequence's overlapping substrings share bases across
/// consecutive k-mers within one run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperKmer {
    /// Forward-orientation nucleotide bytes, length `k + count - 1`.
    pub bases: Vec<u8>,
    /// Number of k-mers this run contains, `1..=255`.
    pub count: u8,
}

impl SuperKmer {
    #[must_use]
    pub const fn kmer_count(&self) -> usize {
        self.count as usize
    }

    /// Reconstructs each k-mer-length window this super-k-mer covers, in
    /// order.
    pub fn kmers(&self, k: usize) -> impl Iterator<Item = &[u8]> {
        (0..self.kmer_count()).map(move |i| &self.bases[i..i + k])
    }
}

/// Splits one sequence into `(partition, super-k-mer)` pairs.
///
/// A run boundary is forced whenever the minimizer's partition changes,
/// the k-mer contains a non-ACGT byte (which also drops that k-mer from
/// counting entirely — it is never emitted in any super-k-mer), or the
/// run has already accumulated 255 k-mers (the count byte's ceiling).
#[must_use]
pub fn split_sequence(seq: &[u8], k: usize, m: usize, pmap: &PartitionMap) -> Vec<(u32, SuperKmer)> {
    let mut out = Vec::new();
    if seq.len() < k {
        return out;
    }

    let mut current: Option<(u32, usize, u8)> = None; // (partition, start, count)

    let flush = |current: &mut Option<(u32, usize, u8)>, out: &mut Vec<(u32, SuperKmer)>| {
        if let Some((partition, start, count)) = current.take() {
            let len = k + usize::from(count) - 1;
            let bases = seq[start..start + len].to_ascii_uppercase();
            out.push((partition, SuperKmer { bases, count }));
        }
    };

    for start in 0..=(seq.len() - k) {
        let window = &seq[start..start + k];
        let Ok(kmer) = Kmer::encode(window, k) else {
            flush(&mut current, &mut out);
            continue;
        };
        let partition = match kmer.minimizer(m) {
            Some((mmer, _pos)) => pmap.partition_of(&mmer),
            None => DEFAULT_MINIMIZER,
        };

        match &mut current {
            Some((cur_partition, _, cur_count)) if *cur_partition == partition && *cur_count < 255 => {
                *cur_count += 1;
            }
            _ => {
                flush(&mut current, &mut out);
                current = Some((partition, start, 1));
            }
        }
    }
    flush(&mut current, &mut out);
    out
}

/// Buffers and block-frames super-k-mers destined for one partition's
/// file. A block is `u32 block_size | [u8 count][packed nucleotides]*`,
/// optionally LZ4-compressed; the surrounding file carries the shared
/// [`FileHeader`].
pub struct SuperkWriter<W: Write> {
    writer: W,
    buffer: Vec<u8>,
    capacity: usize,
    compress: bool,
    kmer_count: u64,
    byte_size: u64,
    header_written: bool,
}

impl<W: Write> SuperkWriter<W> {
    #[must_use]
    pub fn new(writer: W, capacity: usize, compress: bool) -> Self {
        Self {
            writer,
            buffer: Vec::with_capacity(capacity),
            capacity,
            compress,
            kmer_count: 0,
            byte_size: 0,
            header_written: false,
        }
    }

    fn ensure_header(&mut self, path: &std::path::Path) -> Result<(), KmtricksError> {
        if !self.header_written {
            FileHeader::new(FileKind::Superk, self.compress).write_to(&mut self.writer, path)?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Appends one super-k-mer to the in-flight buffer, flushing a block
    /// if the buffer has reached capacity.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] if a flush fails.
    pub fn push(&mut self, superkmer: &SuperKmer, path: &std::path::Path) -> Result<(), KmtricksError> {
        self.ensure_header(path)?;
        self.buffer.push(superkmer.count);
        self.buffer
            .extend_from_slice(&Kmer::pack_bases(&superkmer.bases));
        self.kmer_count += u64::from(superkmer.count);
        if self.buffer.len() >= self.capacity {
            self.flush_block(path)?;
        }
        Ok(())
    }

    fn flush_block(&mut self, path: &std::path::Path) -> Result<(), KmtricksError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
        let block: Vec<u8> = if self.compress {
            lz4_compress(&self.buffer)?
        } else {
            std::mem::take(&mut self.buffer)
        };
        self.writer
            .write_all(&(block.len() as u32).to_le_bytes())
            .map_err(io)?;
        self.writer.write_all(&block).map_err(io)?;
        self.byte_size += 4 + block.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Flushes any remaining buffered super-k-mers as a final (possibly
    /// undersized) block and returns the total k-mer count and byte size
    /// written, for the [`SuperkBinInfo`] manifest entry.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] if the final flush fails.
    pub fn finish(mut self, path: &std::path::Path) -> Result<(u64, u64), KmtricksError> {
        self.ensure_header(path)?;
        self.flush_block(path)?;
        Ok((self.kmer_count, self.byte_size))
    }
}

/// Reads back every super-k-mer written by a [`SuperkWriter`] for a given
/// k. Blocks are read until EOF; each block is optionally LZ4-decoded,
/// then parsed as a run of `[u8 count][packed nucleotides]*` records.
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] if the header or a block is
/// malformed or truncated, or [`KmtricksError::Io`] on a read failure.
pub fn read_superk_file<R: Read>(mut r: R, k: usize, path: &std::path::Path) -> Result<Vec<SuperKmer>, KmtricksError> {
    let header = FileHeader::read_from(&mut r, path)?;
    if header.kind != FileKind::Superk {
        return Err(KmtricksError::format("not a superk file", path.to_path_buf()));
    }

    let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
    let mut out = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match r.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(io(e)),
        }
        let block_len = u32::from_le_bytes(len_buf) as usize;
        let mut block = vec![0u8; block_len];
        r.read_exact(&mut block).map_err(io)?;
        let block = if header.compressed { lz4_decompress(&block)? } else { block };
        parse_block(&block, k, path, &mut out)?;
    }
    Ok(out)
}

fn parse_block(block: &[u8], k: usize, path: &std::path::Path, out: &mut Vec<SuperKmer>) -> Result<(), KmtricksError> {
    let mut pos = 0;
    while pos < block.len() {
        let count = *block
            .get(pos)
            .ok_or_else(|| KmtricksError::format("truncated superk record", path.to_path_buf()))?;
        pos += 1;
        let len = k + usize::from(count) - 1;
        let packed_len = len.div_ceil(4);
        let packed = block
            .get(pos..pos + packed_len)
            .ok_or_else(|| KmtricksError::format("truncated superk record bases", path.to_path_buf()))?;
        pos += packed_len;
        let bases = Kmer::unpack_bases(packed, len);
        out.push(SuperKmer { bases, count });
    }
    Ok(())
}

/// One partition's entry in the per-sample super-k-mer manifest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SuperkBinInfo {
    pub partition: u32,
    pub kmer_count: u64,
    pub byte_size: u64,
}

/// Manifest written alongside a sample's super-k-mer files, letting
/// `PartitionCounter` pick dense-hash-map vs. sort-then-aggregate without
/// re-scanning the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuperKmerBinInfoFile {
    pub entries: Vec<SuperkBinInfo>,
}

impl SuperKmerBinInfoFile {
    #[must_use]
    pub fn kmer_count_for(&self, partition: u32) -> u64 {
        self.entries
            .iter()
            .find(|e| e.partition == partition)
            .map_or(0, |e| e.kmer_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition_map::PartitionPolicy;
    use std::collections::HashMap;

    fn trivial_map(num_partitions: u32) -> PartitionMap {
        PartitionMap::build(4, num_partitions, &HashMap::new(), PartitionPolicy::Ordered).unwrap()
    }

    #[test]
    fn split_reconstructs_every_kmer() {
        let seq = b"ACGTACGTACGT";
        let k = 4;
        let pmap = trivial_map(1);
        let runs = split_sequence(seq, k, 4, &pmap);
        let mut reconstructed: Vec<Vec<u8>> = Vec::new();
        for (_, superkmer) in &runs {
            for kmer in superkmer.kmers(k) {
                reconstructed.push(kmer.to_vec());
            }
        }
        let expected: Vec<Vec<u8>> = (0..=(seq.len() - k)).map(|i| seq[i..i + k].to_vec()).collect();
        assert_eq!(reconstructed, expected);
    }

    #[test]
    fn non_acgt_forces_boundary_and_drops_spanning_kmers() {
        let seq = b"ACGTNACGT";
        let k = 4;
        let pmap = trivial_map(1);
        let runs = split_sequence(seq, k, 4, &pmap);
        let all_bases: Vec<u8> = runs.iter().flat_map(|(_, sk)| sk.bases.clone()).collect();
        assert!(!all_bases.contains(&b'N'));
        let total_kmers: usize = runs.iter().map(|(_, sk)| sk.kmer_count()).sum();
        // ACGT and ACGT each yield exactly 1 four-mer; none spans the N.
        assert_eq!(total_kmers, 2);
    }

    #[test]
    fn run_count_caps_at_255() {
        let seq = vec![b'A'; 10 + 300]; // all-A forces DEFAULT_MINIMIZER every time (same partition)
        let pmap = trivial_map(1);
        let runs = split_sequence(&seq, 10, 4, &pmap);
        for (_, sk) in &runs {
            assert!(sk.count <= 255);
        }
    }

    #[test]
    fn writer_round_trips_block_framing() {
        let seq = b"ACGTACGTACGTACGTACGT";
        let k = 4;
        let pmap = trivial_map(1);
        let runs = split_sequence(seq, k, 4, &pmap);

        let mut buf = Vec::new();
        let mut writer = SuperkWriter::new(&mut buf, DEFAULT_BLOCK_CAPACITY, false);
        for (_, sk) in &runs {
            writer.push(sk, std::path::Path::new("x")).unwrap();
        }
        let (kmer_count, byte_size) = writer.finish(std::path::Path::new("x")).unwrap();
        assert!(kmer_count > 0);
        assert!(byte_size > 0);

        // header (21) + u32 block len + block bytes
        assert!(buf.len() > 21 + 4);
    }

    #[test]
    fn writer_and_reader_round_trip_superkmers() {
        let seq = b"ACGTACGTACGTACGTACGT";
        let k = 4;
        let pmap = trivial_map(1);
        let runs = split_sequence(seq, k, 4, &pmap);

        let mut buf = Vec::new();
        let mut writer = SuperkWriter::new(&mut buf, DEFAULT_BLOCK_CAPACITY, false);
        for (_, sk) in &runs {
            writer.push(sk, std::path::Path::new("x")).unwrap();
        }
        writer.finish(std::path::Path::new("x")).unwrap();

        let restored = read_superk_file(std::io::Cursor::new(buf), k, std::path::Path::new("x")).unwrap();
        let original: Vec<SuperKmer> = runs.into_iter().map(|(_, sk)| sk).collect();
        assert_eq!(restored, original);
    }

    #[test]
    fn writer_and_reader_round_trip_compressed() {
        let seq = b"ACGTACGTACGTACGTACGTACGTACGTACGT";
        let k = 6;
        let pmap = trivial_map(1);
        let runs = split_sequence(seq, k, 4, &pmap);

        let mut buf = Vec::new();
        let mut writer = SuperkWriter::new(&mut buf, DEFAULT_BLOCK_CAPACITY, true);
        for (_, sk) in &runs {
            writer.push(sk, std::path::Path::new("x")).unwrap();
        }
        writer.finish(std::path::Path::new("x")).unwrap();

        let restored = read_superk_file(std::io::Cursor::new(buf), k, std::path::Path::new("x")).unwrap();
        let original: Vec<SuperKmer> = runs.into_iter().map(|(_, sk)| sk).collect();
        assert_eq!(restored, original);
    }
}

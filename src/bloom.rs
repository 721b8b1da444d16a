//! Bloom filter assembly from vector-mode partition output.
//!
//! Concatenates a sample's per-partition presence bitsets (in partition
//! order `0..P`) behind a small fixed-size header. The header's magic
//! starts unset and is only overwritten to its set value after the whole
//! body has been written, so a reader that opens the file mid-write sees
//! an incomplete filter and waits rather than trusting partial data — the
//! same atomic-publication trick the super-k-mer writer uses for its
//! block framing, applied here to a single whole-file flip instead of
//! per-block.

use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::counter::BitVector;
use crate::error::KmtricksError;

/// Header magic before the body has been fully written.
pub const MAGIC_UNSET: u32 = 0x0000_0000;
/// Header magic once the filter is safe to read.
pub const MAGIC_SET: u32 = 0x424c_4f4f;

const KIND_FIELD_LEN: usize = 8;
const COMPRESSOR_FIELD_LEN: usize = 16;
const KIND_SIMPLE: &[u8; KIND_FIELD_LEN] = b"simple\0\0";
const COMPRESSOR_UNCOMPRESSED: &[u8; COMPRESSOR_FIELD_LEN] = b"uncompressed\0\0\0\0";

/// Unpadded size of the fixed header fields before rounding.
const HEADER_UNPADDED_LEN: usize = 4 + 4 + KIND_FIELD_LEN + 4 + 8 + 8 + COMPRESSOR_FIELD_LEN + 8 + 8;

/// Header size rounded up to a 16-byte boundary.
#[must_use]
pub const fn header_size() -> u64 {
    ((HEADER_UNPADDED_LEN + 15) / 16 * 16) as u64
}

/// A parsed Bloom filter header: one hash function, the hash modulus
/// `P*W` the vector was built over, and a single vector-info record
/// describing where the concatenated bits live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomHeader {
    pub version: u32,
    pub num_hash: u32,
    pub seed: u64,
    pub hash_modulus: u64,
    pub vector_byte_offset: u64,
    pub vector_num_bytes: u64,
}

impl BloomHeader {
    #[must_use]
    pub fn for_partitions(num_partitions: u32, window: u64) -> Self {
        let hash_modulus = u64::from(num_partitions).saturating_mul(window);
        Self {
            version: crate::format_file::FORMAT_VERSION,
            num_hash: 1,
            seed: 0,
            hash_modulus,
            vector_byte_offset: header_size(),
            vector_num_bytes: hash_modulus / 8 + 8,
        }
    }

    fn write_body<W: Write>(&self, w: &mut W, path: &Path) -> Result<(), KmtricksError> {
        let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
        w.write_all(&MAGIC_UNSET.to_le_bytes()).map_err(io)?;
        w.write_all(&self.version.to_le_bytes()).map_err(io)?;
        w.write_all(KIND_SIMPLE).map_err(io)?;
        w.write_all(&self.num_hash.to_le_bytes()).map_err(io)?;
        w.write_all(&self.seed.to_le_bytes()).map_err(io)?;
        w.write_all(&self.hash_modulus.to_le_bytes()).map_err(io)?;
        w.write_all(COMPRESSOR_UNCOMPRESSED).map_err(io)?;
        w.write_all(&self.vector_byte_offset.to_le_bytes()).map_err(io)?;
        w.write_all(&self.vector_num_bytes.to_le_bytes()).map_err(io)?;
        let padding = header_size() as usize - HEADER_UNPADDED_LEN;
        w.write_all(&vec![0u8; padding]).map_err(io)?;
        Ok(())
    }
}

/// Concatenates `partitions` (already in partition order) behind a
/// [`BloomHeader`], then flips the header's magic from unset to set.
///
/// # Errors
///
/// Returns [`KmtricksError::Io`] on any write/seek failure, or
/// [`KmtricksError::Config`] if `partitions` is empty or the partitions'
/// vector lengths disagree (every partition must share the same window
/// `W`).
pub fn assemble<W: Write + Seek>(writer: &mut W, partitions: &[BitVector], path: &Path) -> Result<(), KmtricksError> {
    if partitions.is_empty() {
        return Err(KmtricksError::config("cannot assemble a Bloom filter from zero partitions"));
    }
    let window = partitions[0].len();
    if partitions.iter().any(|p| p.len() != window) {
        return Err(KmtricksError::config("partition vector lengths disagree"));
    }

    let num_partitions = u32::try_from(partitions.len())
        .map_err(|_| KmtricksError::config("too many partitions for a single Bloom filter"))?;
    let header = BloomHeader::for_partitions(num_partitions, window);

    let io = |e: std::io::Error| KmtricksError::io(e, path.to_path_buf());
    header.write_body(writer, path)?;
    for partition in partitions {
        writer.write_all(partition.as_bytes()).map_err(io)?;
    }

    writer.seek(SeekFrom::Start(0)).map_err(io)?;
    writer.write_all(&MAGIC_SET.to_le_bytes()).map_err(io)?;
    writer.seek(SeekFrom::End(0)).map_err(io)?;
    Ok(())
}

/// Reads back a [`BloomHeader`], returning `None` if the magic is still
/// unset (the writer has not finished, or crashed mid-write).
///
/// # Errors
///
/// Returns [`KmtricksError::Io`] on a read failure, or
/// [`KmtricksError::Format`] if the header fields are structurally
/// invalid (unrecognized kind/compressor tag).
pub fn read_header<R: std::io::Read>(mut r: R, path: &Path) -> Result<Option<BloomHeader>, KmtricksError> {
    let mut buf = vec![0u8; header_size() as usize];
    r.read_exact(&mut buf).map_err(|e| KmtricksError::io(e, path.to_path_buf()))?;

    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if magic == MAGIC_UNSET {
        return Ok(None);
    }
    if magic != MAGIC_SET {
        return Err(KmtricksError::format(format!("bad Bloom header magic {magic:#x}"), path.to_path_buf()));
    }

    let mut offset = 4;
    let version = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
    offset += 4;
    let kind = &buf[offset..offset + KIND_FIELD_LEN];
    if kind != KIND_SIMPLE {
        return Err(KmtricksError::format("unrecognized Bloom kind tag", path.to_path_buf()));
    }
    offset += KIND_FIELD_LEN;
    let num_hash = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
    offset += 4;
    let seed = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
    offset += 8;
    let hash_modulus = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
    offset += 8;
    let compressor = &buf[offset..offset + COMPRESSOR_FIELD_LEN];
    if compressor != COMPRESSOR_UNCOMPRESSED {
        return Err(KmtricksError::format("unrecognized Bloom compressor tag", path.to_path_buf()));
    }
    offset += COMPRESSOR_FIELD_LEN;
    let vector_byte_offset = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
    offset += 8;
    let vector_num_bytes = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());

    Ok(Some(BloomHeader {
        version,
        num_hash,
        seed,
        hash_modulus,
        vector_byte_offset,
        vector_num_bytes,
    }))
}

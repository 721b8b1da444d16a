//! Compression primitives for on-disk blocks.
//!
//! Two independent codecs back the spec's "compressed hash block" format:
//! an LZ4 stream wrapper for superk/kmer blocks (treated elsewhere as a
//! black box, backed here by the real `lz4_flex` crate since this pack
//! carries no consumable LZ4 library dependency), and a hand-rolled
//! delta+varint/zigzag codec for hash partitions, where hashes are
//! strictly ascending within a partition and counts are not.

use std::io::Write as _;

use crate::error::KmtricksError;

/// Compresses a buffer with the LZ4 frame format.
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] if the encoder fails.
pub fn lz4_compress(data: &[u8]) -> Result<Vec<u8>, KmtricksError> {
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    encoder
        .write_all(data)
        .map_err(|e| KmtricksError::format(format!("lz4 encode: {e}"), "<memory>"))?;
    encoder
        .finish()
        .map_err(|e| KmtricksError::format(format!("lz4 finish: {e}"), "<memory>"))
}

/// Decompresses an LZ4 frame-format buffer.
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] if the stream is truncated or corrupt.
pub fn lz4_decompress(data: &[u8]) -> Result<Vec<u8>, KmtricksError> {
    use std::io::Read as _;
    let mut decoder = lz4_flex::frame::FrameDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| KmtricksError::format(format!("lz4 decode: {e}"), "<memory>"))?;
    Ok(out)
}

/// Appends `value` to `out` as a LEB128 unsigned varint.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Reads a LEB128 unsigned varint from `buf` starting at `*pos`, advancing
/// `*pos` past it.
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] if the buffer ends mid-varint.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, KmtricksError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let &byte = buf
            .get(*pos)
            .ok_or_else(|| KmtricksError::format("truncated varint", "<memory>"))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Maps a signed value to an unsigned one, small magnitudes first, so
/// small negative deltas varint-encode as compactly as small positive ones.
#[must_use]
pub const fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[must_use]
pub const fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Delta + varint encoding for strictly ascending `u64` sequences (hash
/// streams): `p4nd1` in the on-disk format notation.
#[must_use]
pub fn encode_delta_ascending(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev = 0u64;
    for &v in values {
        debug_assert!(v >= prev);
        write_varint(&mut out, v - prev);
        prev = v;
    }
    out
}

/// Inverse of [`encode_delta_ascending`].
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] on a truncated stream.
pub fn decode_delta_ascending(buf: &[u8], count: usize) -> Result<Vec<u64>, KmtricksError> {
    let mut pos = 0;
    let mut prev = 0u64;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let delta = read_varint(buf, &mut pos)?;
        prev += delta;
        out.push(prev);
    }
    Ok(out)
}

/// Delta + zigzag + varint encoding for arbitrary (not necessarily
/// monotonic) `u32` count sequences: `p4nz` in the on-disk format notation.
#[must_use]
pub fn encode_delta_zigzag(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev: i64 = 0;
    for &v in values {
        let cur = i64::from(v);
        write_varint(&mut out, zigzag_encode(cur - prev));
        prev = cur;
    }
    out
}

/// Inverse of [`encode_delta_zigzag`].
///
/// # Errors
///
/// Returns [`KmtricksError::Format`] on a truncated stream or an out-of-range
/// decoded value.
pub fn decode_delta_zigzag(buf: &[u8], count: usize) -> Result<Vec<u32>, KmtricksError> {
    let mut pos = 0;
    let mut prev: i64 = 0;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let delta = zigzag_decode(read_varint(buf, &mut pos)?);
        prev += delta;
        let v = u32::try_from(prev)
            .map_err(|_| KmtricksError::format("zigzag-decoded count out of u32 range", "<memory>"))?;
        out.push(v);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_round_trips() {
        let data = b"ACGTACGTACGTACGTACGTACGTACGTACGT".repeat(100);
        let compressed = lz4_compress(&data).unwrap();
        let decompressed = lz4_decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn varint_round_trips_small_and_large() {
        for v in [0u64, 1, 127, 128, 300, u64::MAX / 2, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, v);
            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos).unwrap(), v);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn zigzag_round_trips() {
        for v in [0i64, 1, -1, 2, -2, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn delta_ascending_round_trips() {
        let hashes = vec![3u64, 3, 10, 10_000, 10_001, u64::MAX];
        let encoded = encode_delta_ascending(&hashes);
        let decoded = decode_delta_ascending(&encoded, hashes.len()).unwrap();
        assert_eq!(decoded, hashes);
    }

    #[test]
    fn delta_zigzag_round_trips_non_monotonic() {
        let counts = vec![5u32, 1, 255, 0, 100, 100];
        let encoded = encode_delta_zigzag(&counts);
        let decoded = decode_delta_zigzag(&encoded, counts.len()).unwrap();
        assert_eq!(decoded, counts);
    }

    #[test]
    fn read_varint_rejects_truncated_input() {
        let buf = [0x80u8]; // continuation bit set, no following byte
        let mut pos = 0;
        assert!(read_varint(&buf, &mut pos).is_err());
    }
}

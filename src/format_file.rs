//! Shared binary file header for every on-disk artifact.
//!
//! Every file the pipeline writes (partition maps aside, which nest their
//! own corruption-detection magic — see [`crate::partition_map`]) starts
//! with the same 21-byte preamble: an 8-byte base magic, a 4-byte format
//! version, a 1-byte compressed flag, and an 8-byte magic identifying the
//! file's kind. Readers check all three before trusting anything past
//! offset 21, so a truncated or misrouted file fails fast with a
//! `KmtricksError::Format` instead of a confusing parse error deeper in.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::KmtricksError;

/// `"kmtricks"` read as a little-endian `u64`.
pub const BASE_MAGIC: u64 = 0x6b6d_7472_6963_6b73;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Identifies which kind of artifact a file holds, each with a distinct
/// 8-byte magic so a reader never silently parses the wrong kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Kmer,
    Hash,
    Matrix,
    PaMatrix,
    Vector,
    BitMatrix,
    Hist,
    Superk,
    Minimizers,
}

impl FileKind {
    #[must_use]
    pub const fn magic(self) -> u64 {
        match self {
            Self::Kmer => 0x0000_0000_7265_6d6b,
            Self::Hash => 0x0000_0000_6873_6168,
            Self::Matrix => 0x6b5f_7869_7274_616d,
            Self::PaMatrix => 0x006b_5f74_616d_6170,
            Self::Vector => 0x0000_726f_7463_6576,
            Self::BitMatrix => 0x0000_7461_6d74_6962,
            Self::Hist => 0x0000_0074_7369_686b,
            Self::Superk => 0x0000_6b72_6570_7573,
            Self::Minimizers => 0x006d_696e_696d_7370,
        }
    }

    const fn from_magic(magic: u64) -> Option<Self> {
        match magic {
            m if m == Self::Kmer.magic() => Some(Self::Kmer),
            m if m == Self::Hash.magic() => Some(Self::Hash),
            m if m == Self::Matrix.magic() => Some(Self::Matrix),
            m if m == Self::PaMatrix.magic() => Some(Self::PaMatrix),
            m if m == Self::Vector.magic() => Some(Self::Vector),
            m if m == Self::BitMatrix.magic() => Some(Self::BitMatrix),
            m if m == Self::Hist.magic() => Some(Self::Hist),
            m if m == Self::Superk.magic() => Some(Self::Superk),
            m if m == Self::Minimizers.magic() => Some(Self::Minimizers),
            _ => None,
        }
    }
}

/// The parsed 21-byte header common to every artifact file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub compressed: bool,
    pub kind: FileKind,
}

impl FileHeader {
    #[must_use]
    pub fn new(kind: FileKind, compressed: bool) -> Self {
        Self {
            version: FORMAT_VERSION,
            compressed,
            kind,
        }
    }

    /// Writes the 21-byte header.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Io`] on a write failure.
    pub fn write_to<W: Write>(&self, mut w: W, path: &Path) -> Result<(), KmtricksError> {
        let mut buf = [0u8; 21];
        buf[0..8].copy_from_slice(&BASE_MAGIC.to_le_bytes());
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12] = u8::from(self.compressed);
        buf[13..21].copy_from_slice(&self.kind.magic().to_le_bytes());
        w.write_all(&buf)
            .map_err(|e| KmtricksError::io(e, path.to_path_buf()))
    }

    /// Reads and validates the 21-byte header.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Format`] if the base magic, version, or
    /// per-kind magic do not match, or [`KmtricksError::Io`] on a read
    /// failure.
    pub fn read_from<R: Read>(mut r: R, path: &Path) -> Result<Self, KmtricksError> {
        let mut buf = [0u8; 21];
        r.read_exact(&mut buf)
            .map_err(|e| KmtricksError::io(e, path.to_path_buf()))?;
        let magic = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        if magic != BASE_MAGIC {
            return Err(KmtricksError::format(
                format!("bad base magic {magic:#x}"),
                path.to_path_buf(),
            ));
        }
        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(KmtricksError::format(
                format!("unsupported format version {version}"),
                path.to_path_buf(),
            ));
        }
        let compressed = buf[12] != 0;
        let kind_magic = u64::from_le_bytes(buf[13..21].try_into().unwrap());
        let kind = FileKind::from_magic(kind_magic).ok_or_else(|| {
            KmtricksError::format(format!("unknown file-kind magic {kind_magic:#x}"), path.to_path_buf())
        })?;
        Ok(Self {
            version,
            compressed,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_header() {
        let header = FileHeader::new(FileKind::Kmer, true);
        let mut buf = Vec::new();
        header.write_to(&mut buf, Path::new("test.kmer")).unwrap();
        assert_eq!(buf.len(), 21);
        let parsed = FileHeader::read_from(Cursor::new(buf), Path::new("test.kmer")).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn rejects_bad_base_magic() {
        let mut buf = vec![0u8; 21];
        buf[0] = 0xff;
        let err = FileHeader::read_from(Cursor::new(buf), Path::new("x")).unwrap_err();
        assert!(matches!(err, KmtricksError::Format { .. }));
    }

    #[test]
    fn rejects_unknown_kind_magic() {
        let mut buf = vec![0u8; 21];
        buf[0..8].copy_from_slice(&BASE_MAGIC.to_le_bytes());
        buf[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[13..21].copy_from_slice(&0xDEAD_BEEFu64.to_le_bytes());
        let err = FileHeader::read_from(Cursor::new(buf), Path::new("x")).unwrap_err();
        assert!(matches!(err, KmtricksError::Format { .. }));
    }

    #[test]
    fn every_kind_round_trips() {
        for kind in [
            FileKind::Kmer,
            FileKind::Hash,
            FileKind::Matrix,
            FileKind::PaMatrix,
            FileKind::Vector,
            FileKind::BitMatrix,
            FileKind::Hist,
            FileKind::Superk,
            FileKind::Minimizers,
        ] {
            let header = FileHeader::new(kind, false);
            let mut buf = Vec::new();
            header.write_to(&mut buf, Path::new("t")).unwrap();
            let parsed = FileHeader::read_from(Cursor::new(buf), Path::new("t")).unwrap();
            assert_eq!(parsed.kind, kind);
        }
    }
}

//! Runtime-tagged count storage.
//!
//! The abundance integer width (1, 2, or 4 bytes) is a run-wide
//! configuration choice derived from `MAX_C`, not a compile-time type
//! parameter: `CountWidth` picks the width once at configure time, and
//! `CountSlot` is the saturating value stored per (k-mer, sample) cell.

use serde::{Deserialize, Serialize};

use crate::error::KmtricksError;

/// The integer width backing one sample's counts for a run, chosen from
/// the configured `MAX_C` (the smallest unsigned width that can hold it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountWidth {
    U8,
    U16,
    U32,
}

impl CountWidth {
    /// Picks the narrowest width that can represent `max_c` without
    /// saturating below its own ceiling.
    #[must_use]
    pub const fn for_max_c(max_c: u32) -> Self {
        if max_c <= u8::MAX as u32 {
            Self::U8
        } else if max_c <= u16::MAX as u32 {
            Self::U16
        } else {
            Self::U32
        }
    }

    #[must_use]
    pub const fn byte_len(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    #[must_use]
    pub const fn max_value(self) -> u32 {
        match self {
            Self::U8 => u8::MAX as u32,
            Self::U16 => u16::MAX as u32,
            Self::U32 => u32::MAX,
        }
    }
}

/// A single saturating abundance value, stored at the width configured for
/// the run via [`CountWidth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CountSlot(u32);

impl CountSlot {
    /// Builds a slot from a raw (unsaturated) count, clamping to `max_c`.
    #[must_use]
    pub fn saturating(count: u64, max_c: u32) -> Self {
        Self(u32::try_from(count).unwrap_or(u32::MAX).min(max_c))
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Rebuilds a slot from an already-saturated value, e.g. one decoded
    /// from an on-disk record.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Serializes at the given width, little-endian.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Logic`] if the value does not fit `width`
    /// (should never happen if the slot was built with `max_c` consistent
    /// with `width`).
    pub fn write_to(self, width: CountWidth, out: &mut Vec<u8>) -> Result<(), KmtricksError> {
        match width {
            CountWidth::U8 => {
                let v = u8::try_from(self.0)
                    .map_err(|_| KmtricksError::logic(format!("count {} overflows u8", self.0)))?;
                out.push(v);
            }
            CountWidth::U16 => {
                let v = u16::try_from(self.0)
                    .map_err(|_| KmtricksError::logic(format!("count {} overflows u16", self.0)))?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            CountWidth::U32 => out.extend_from_slice(&self.0.to_le_bytes()),
        }
        Ok(())
    }

    /// Reads a slot at the given width from `buf` starting at `*pos`,
    /// advancing `*pos` past it.
    ///
    /// # Errors
    ///
    /// Returns [`KmtricksError::Format`] if `buf` is too short.
    pub fn read_from(buf: &[u8], pos: &mut usize, width: CountWidth) -> Result<Self, KmtricksError> {
        let len = width.byte_len();
        let slice = buf
            .get(*pos..*pos + len)
            .ok_or_else(|| KmtricksError::format("truncated count slot", "<memory>"))?;
        *pos += len;
        let value = match width {
            CountWidth::U8 => u32::from(slice[0]),
            CountWidth::U16 => u32::from(u16::from_le_bytes(slice.try_into().unwrap())),
            CountWidth::U32 => u32::from_le_bytes(slice.try_into().unwrap()),
        };
        Ok(Self(value))
    }
}

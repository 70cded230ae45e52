#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation and narrowing failures for the types in this crate.
///
/// Converted into the workspace-wide error type at crate boundaries; this
/// crate stays free of dependencies on the error crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("invalid block size: {value} ({reason})")]
    InvalidBlockSize { value: u32, reason: &'static str },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

/// Device block index (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }

    /// Byte offset of the first byte of this block.
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub fn to_byte_offset(self, block_size: BlockSize) -> Option<ByteOffset> {
        self.0.checked_mul(block_size.as_u64()).map(ByteOffset)
    }
}

/// Logical byte offset in the append log.
///
/// Unit-carrying wrapper to prevent mixing byte offsets with block numbers.
/// The same type addresses the device, since the log is laid out identically
/// on both sides: logical offset == device offset for full blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Subtract a byte count, returning `None` on underflow.
    #[must_use]
    pub fn checked_sub(self, bytes: u64) -> Option<Self> {
        self.0.checked_sub(bytes).map(Self)
    }

    /// Narrow to `usize`, returning `GeometryError::IntegerConversion` on overflow.
    pub fn to_usize(self) -> Result<usize, GeometryError> {
        usize::try_from(self.0).map_err(|_| GeometryError::IntegerConversion {
            field: "byte_offset",
        })
    }
}

/// Validated device block size.
///
/// Nonzero and representable as `usize`; a power of two is recommended for
/// real devices but not required, so all block arithmetic uses division and
/// remainder rather than shifts and masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Block size used when a store is opened without explicit geometry.
    pub const DEFAULT: Self = Self(4096);

    /// Create a `BlockSize`, rejecting zero and values too large for `usize`.
    pub fn new(value: u32) -> Result<Self, GeometryError> {
        if value == 0 {
            return Err(GeometryError::InvalidBlockSize {
                value,
                reason: "must be nonzero",
            });
        }
        if usize::try_from(value).is_err() {
            return Err(GeometryError::InvalidBlockSize {
                value,
                reason: "does not fit usize",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        u64::from(self.0)
    }

    /// Block size as a buffer length. `new` guarantees the value fits.
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }

    /// Block containing the given byte offset.
    #[must_use]
    pub fn block_of(self, offset: ByteOffset) -> BlockNumber {
        BlockNumber(offset.0 / self.as_u64())
    }

    /// Block-aligned start of the block containing `offset`:
    /// `offset - (offset mod B)`.
    #[must_use]
    pub fn block_floor(self, offset: ByteOffset) -> ByteOffset {
        ByteOffset(offset.0 - offset.0 % self.as_u64())
    }

    /// Position of `offset` within its block. Always `< B`, so the narrowing
    /// cannot fail for a size accepted by `new`.
    #[must_use]
    pub fn offset_in_block(self, offset: ByteOffset) -> usize {
        usize::try_from(offset.0 % self.as_u64()).unwrap_or(usize::MAX)
    }

    /// Whether `offset` sits exactly on a block boundary.
    #[must_use]
    pub fn is_block_aligned(self, offset: ByteOffset) -> bool {
        offset.0 % self.as_u64() == 0
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

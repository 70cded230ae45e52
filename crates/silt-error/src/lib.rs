#![forbid(unsafe_code)]
//! Error types for the silt log store.
//!
//! # Error Taxonomy
//!
//! `SiltError` is the single user-facing error type returned by the device
//! layer and the store API. It divides by phase:
//!
//! | Phase | Variants | Surfaced by |
//! |-------|----------|-------------|
//! | Construction/open | `Geometry`, `Config`, `Io` | `open`/`open_with`/`with_device`, device constructors |
//! | Foreground I/O | `Io`, `ReadOnly`, `OutOfBounds` | `read_at`, device read/write |
//! | Background persistence | `WriteBack` | every call after a persister failure |
//!
//! ## Design Constraints
//!
//! - `silt-error` must not depend on `silt-types` (no cyclic deps). Typed
//!   validation errors from `silt-types` are rendered into `Geometry` at the
//!   crate boundary that observes them.
//! - The write-back latch cannot carry the original `std::io::Error` (the
//!   error is reported to every subsequent caller, and `io::Error` is not
//!   `Clone`), so `WriteBack` carries the rendered detail instead.
//! - All string payloads are owned (`String`) so errors can cross the
//!   persister thread boundary.

use thiserror::Error;

/// Unified error type for all silt operations.
#[derive(Debug, Error)]
pub enum SiltError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid block size, device length, block range, or buffer length.
    ///
    /// Raised synchronously by device constructors and whole-block I/O
    /// argument validation.
    #[error("invalid geometry: {0}")]
    Geometry(String),

    /// Write attempted on a device that was opened read-only.
    #[error("read-only device")]
    ReadOnly,

    /// Read request extends past the logical write cursor.
    ///
    /// The caller's fault; no partial result is produced.
    #[error("read beyond write cursor: offset={offset} len={len} cursor={cursor}")]
    OutOfBounds { offset: u64, len: u64, cursor: u64 },

    /// A background device write failed and the store is permanently failed.
    ///
    /// Latched by the persister at the failing block's device offset and
    /// returned by every subsequent `append`/`read_at`/`flush`/`close`.
    #[error("write-back failed at device offset {offset}: {detail}")]
    WriteBack { offset: u64, detail: String },

    /// Invalid store configuration (zero ring slots, zero cache lines,
    /// resume offset past device capacity, and similar).
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias using `SiltError`.
pub type Result<T> = std::result::Result<T, SiltError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formatting() {
        let oob = SiltError::OutOfBounds {
            offset: 9000,
            len: 2000,
            cursor: 10000,
        };
        assert_eq!(
            oob.to_string(),
            "read beyond write cursor: offset=9000 len=2000 cursor=10000"
        );

        let wb = SiltError::WriteBack {
            offset: 8192,
            detail: "disk unplugged".into(),
        };
        assert_eq!(
            wb.to_string(),
            "write-back failed at device offset 8192: disk unplugged"
        );

        let geom = SiltError::Geometry("block_size=0".into());
        assert_eq!(geom.to_string(), "invalid geometry: block_size=0");

        let ro = SiltError::ReadOnly;
        assert_eq!(ro.to_string(), "read-only device");

        let cfg = SiltError::Config("ring_slots must be > 0".into());
        assert_eq!(cfg.to_string(), "invalid configuration: ring_slots must be > 0");
    }

    #[test]
    fn io_errors_convert_via_from() {
        let err: SiltError = std::io::Error::other("boom").into();
        assert!(matches!(err, SiltError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: boom");
    }
}

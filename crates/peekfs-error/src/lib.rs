#![forbid(unsafe_code)]
//! Error types for peekfs.
//!
//! Defines `PeekError` and a `Result<T>` alias used throughout the workspace.
//! Every error is terminal to the operation that produced it; nothing retries.

use peekfs_types::ParseError;
use thiserror::Error;

/// Maximum number of symlink hops followed before giving up.
pub const SYMLINK_MAX_HOPS: u32 = 40;

/// Unified error type for all peekfs operations.
#[derive(Debug, Error)]
pub enum PeekError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("superblock magic {found:#06x} is not ext2/3/4")]
    NotExt4 { found: u16 },

    #[error("unsupported incompatible feature flags: {bits:#010x}")]
    UnsupportedFeatures { bits: u32 },

    #[error("unsupported inode layout: {0}")]
    UnsupportedInode(&'static str),

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(#[from] ParseError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("symlink chain exceeded {SYMLINK_MAX_HOPS} hops at {0}")]
    SymlinkLoop(String),
}

/// Result alias using `PeekError`.
pub type Result<T> = std::result::Result<T, PeekError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_convert_to_corrupt_metadata() {
        let parse = ParseError::InvalidMagic {
            expected: 0xF30A,
            actual: 0,
        };
        let err: PeekError = parse.into();
        assert!(matches!(err, PeekError::CorruptMetadata(_)));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        let err: PeekError = io.into();
        assert!(matches!(err, PeekError::Io(_)));
    }

    #[test]
    fn display_carries_diagnostics() {
        let err = PeekError::UnsupportedFeatures { bits: 0x8000 };
        assert_eq!(
            err.to_string(),
            "unsupported incompatible feature flags: 0x00008000"
        );
        let err = PeekError::NotExt4 { found: 0 };
        assert_eq!(err.to_string(), "superblock magic 0x0000 is not ext2/3/4");
    }
}

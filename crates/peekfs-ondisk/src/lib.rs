#![forbid(unsafe_code)]
//! On-disk structure decoding.
//!
//! Pure slice-in / record-out parsers for the ext4 metadata this reader
//! touches: superblock, group descriptor, inode, extent nodes, and directory
//! entries. All multi-byte fields are little-endian. No I/O happens here.

mod ext4;

pub use ext4::*;

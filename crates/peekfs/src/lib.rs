#![forbid(unsafe_code)]
//! Read-only ext2/3/4 reader for inspecting filesystems inside disk images.
//!
//! `Reader` owns a random-access byte source (a file, an in-memory image, an
//! HTTP range-request client) and exposes the directory tree and file
//! contents of one ext4 partition without mounting it. All operations go
//! through the single owner: the source's cursor is shared mutable state, so
//! the reader takes `&mut self` everywhere and never interleaves I/O.
//!
//! ```no_run
//! use peekfs::{read_partition_table, Reader};
//! use std::fs::File;
//!
//! # fn main() -> peekfs::Result<()> {
//! let mut disk = File::open("image.raw")?;
//! let parts = read_partition_table(&mut disk)?;
//! let mut reader = Reader::open_partition(disk, &parts[0])?;
//! let root = reader.root()?;
//! for entry in reader.entries(&root)? {
//!     println!("{} ({})", entry.full_path(), entry.file_type);
//! }
//! # Ok(())
//! # }
//! ```

mod dir;
mod extent;
mod glob;
mod stream;

pub use dir::{DirEntry, Directory};
pub use peekfs_error::{PeekError, Result, SYMLINK_MAX_HOPS};
pub use peekfs_ondisk::{
    DirEntryRecord, Extent, ExtentHeader, ExtentIndex, ExtentNode, FileType, GroupDesc, Inode,
    Superblock,
};
pub use peekfs_source::{
    read_partition_table, ByteSource, PartitionEntry, PARTITION_TYPE_LINUX,
};
pub use peekfs_types::{BlockNumber, BlockSize, GroupNumber, InodeNumber};
pub use stream::InodeStream;

use peekfs_source::read_exact_at;
use peekfs_types::{ParseError, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use tracing::debug;

/// Read-only view of one ext4 partition inside a byte source.
///
/// Holds the byte source exclusively; directories and entries handed out are
/// plain value snapshots that re-enter through `&mut self` methods.
pub struct Reader<S> {
    source: S,
    start: u64,
    len: u64,
    sb: Superblock,
}

impl<S: ByteSource> Reader<S> {
    /// Open the ext4 filesystem in `source` at the given byte range.
    ///
    /// Reads and validates the superblock: wrong magic is `NotExt4`, incompat
    /// feature bits outside {filetype, extents, 64bit, flex_bg, recover} are
    /// `UnsupportedFeatures` with the offending bits.
    #[allow(clippy::cast_possible_truncation)] // superblock magic is 16-bit
    pub fn open(mut source: S, partition_start: u64, partition_len: u64) -> Result<Self> {
        let mut region = vec![0_u8; SUPERBLOCK_SIZE];
        let sb_offset = partition_start
            .checked_add(SUPERBLOCK_OFFSET)
            .ok_or(ParseError::InvalidField {
                field: "partition_start",
                reason: "overflow",
            })?;
        read_exact_at(&mut source, sb_offset, &mut region)?;

        let sb = match Superblock::parse_superblock_region(&region) {
            Ok(sb) => sb,
            Err(ParseError::InvalidMagic { actual, .. }) => {
                return Err(PeekError::NotExt4 {
                    found: actual as u16,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let unsupported = sb.unsupported_incompat();
        if unsupported != 0 {
            return Err(PeekError::UnsupportedFeatures { bits: unsupported });
        }

        debug!(
            target: "peekfs::reader",
            block_size = sb.block_size.get(),
            blocks_count = sb.blocks_count,
            inodes_per_group = sb.inodes_per_group,
            volume = %sb.volume_name,
            "opened ext4 partition"
        );

        Ok(Self {
            source,
            start: partition_start,
            len: partition_len,
            sb,
        })
    }

    /// Open the filesystem described by an MBR partition entry.
    pub fn open_partition(source: S, part: &PartitionEntry) -> Result<Self> {
        Self::open(source, part.byte_offset(), part.byte_len())
    }

    /// The validated superblock.
    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Partition length in bytes.
    #[must_use]
    pub fn partition_len(&self) -> u64 {
        self.len
    }

    /// Absolute byte offset of a filesystem block on the source.
    pub(crate) fn block_offset(&self, block: u64) -> Result<u64> {
        let overflow = ParseError::InvalidField {
            field: "block_offset",
            reason: "overflow",
        };
        block
            .checked_mul(self.sb.block_size.as_u64())
            .and_then(|byte| byte.checked_add(self.start))
            .ok_or_else(|| overflow.into())
    }

    pub(crate) fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        read_exact_at(&mut self.source, offset, buf)
    }

    pub(crate) fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Fetch the descriptor of block group `group`.
    pub fn group_descriptor(&mut self, group: GroupNumber) -> Result<GroupDesc> {
        let rel = self
            .sb
            .group_desc_offset(group)
            .ok_or(ParseError::InvalidField {
                field: "group_desc_offset",
                reason: "overflow",
            })?;
        let offset = self
            .start
            .checked_add(rel)
            .ok_or(ParseError::InvalidField {
                field: "group_desc_offset",
                reason: "overflow",
            })?;

        let desc_size = self.sb.group_desc_size();
        let mut raw = vec![0_u8; usize::from(desc_size)];
        self.read_at(offset, &mut raw)?;
        Ok(GroupDesc::parse_from_bytes(&raw, desc_size)?)
    }

    /// Fetch and decode inode `ino` (1-based; the root directory is inode 2).
    pub fn inode(&mut self, ino: InodeNumber) -> Result<Inode> {
        if ino.0 == 0 {
            return Err(ParseError::InvalidField {
                field: "inode_number",
                reason: "inode 0 is invalid",
            }
            .into());
        }

        let (group, byte_in_table) = self.sb.inode_location(ino);
        let gd = self.group_descriptor(group)?;
        let table_start = self.block_offset(gd.inode_table)?;
        let offset = table_start
            .checked_add(byte_in_table)
            .ok_or(ParseError::InvalidField {
                field: "inode_offset",
                reason: "overflow",
            })?;

        let mut raw = vec![0_u8; usize::from(self.sb.inode_size)];
        self.read_at(offset, &mut raw)?;
        Ok(Inode::parse_from_bytes(&raw)?)
    }

    /// Read the inode's entire content into memory, driving short reads to
    /// completion. Holes and uninitialized extents come back as zero bytes.
    pub fn inode_content(&mut self, inode: &Inode) -> Result<Vec<u8>> {
        let size = usize::try_from(inode.size).map_err(|_| ParseError::InvalidField {
            field: "i_size",
            reason: "exceeds addressable range",
        })?;
        let mut buf = vec![0_u8; size];
        let mut stream = self.inode_stream(inode)?;
        std::io::Read::read_exact(&mut stream, &mut buf)?;
        Ok(buf)
    }
}

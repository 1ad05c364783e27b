#![forbid(unsafe_code)]
//! Byte-source seam for the ext4 reader.
//!
//! `ByteSource` is the single I/O boundary: an absolute-offset cursor with
//! short reads that callers drive to completion. Anything implementing
//! `io::Read + io::Seek` (files, `Cursor`, an HTTP range-request client)
//! qualifies through the blanket impl. Also hosts the MBR partition-table
//! helper, which turns partition entries into byte ranges.

use peekfs_error::{PeekError, Result};
use peekfs_types::{read_fixed, read_le_u32, ParseError};
use std::io::{self, Read, Seek, SeekFrom};
use tracing::trace;

/// Random-access byte stream over a disk image.
///
/// The cursor is shared mutable state: it is undefined between operations,
/// and every consumer re-seeks before reading.
pub trait ByteSource {
    /// Reposition to an absolute byte offset; returns the new offset.
    fn seek_to(&mut self, offset: u64) -> Result<u64>;

    /// Read up to `buf.len()` bytes at the cursor; `Ok(0)` means end of stream.
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Fill `buf` completely, driving short reads.
    ///
    /// A source that ends before `buf` is full is a truncated image; that
    /// surfaces as an I/O error.
    fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_some(&mut buf[filled..])?;
            if n == 0 {
                return Err(PeekError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended after {filled} of {} bytes", buf.len()),
                )));
            }
            filled += n;
        }
        Ok(())
    }
}

impl<T: Read + Seek> ByteSource for T {
    fn seek_to(&mut self, offset: u64) -> Result<u64> {
        Ok(self.seek(SeekFrom::Start(offset))?)
    }

    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.read(buf)?)
    }
}

/// Seek to `offset` and fill `buf` completely.
pub fn read_exact_at<S: ByteSource + ?Sized>(
    source: &mut S,
    offset: u64,
    buf: &mut [u8],
) -> Result<()> {
    trace!(
        target: "peekfs::source",
        offset,
        len = buf.len(),
        "read"
    );
    source.seek_to(offset)?;
    source.read_exact_into(buf)
}

// ── MBR partition table ─────────────────────────────────────────────────────

/// Byte offset of the partition table within the MBR.
const PARTITION_TABLE_OFFSET: u64 = 446;
/// On-disk size of one partition entry.
const PARTITION_ENTRY_SIZE: usize = 16;
/// MBR sectors are always 512 bytes.
const SECTOR_SIZE: u64 = 512;
/// Partition type byte for native Linux filesystems.
pub const PARTITION_TYPE_LINUX: u8 = 0x83;

/// One 16-byte MBR partition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub status: u8,
    pub chs_first: [u8; 3],
    pub kind: u8,
    pub chs_last: [u8; 3],
    /// First sector of the partition, in 512-byte LBA units.
    pub first_lba: u32,
    /// Partition length in 512-byte sectors.
    pub sectors: u32,
}

impl PartitionEntry {
    fn parse(bytes: &[u8]) -> std::result::Result<Self, ParseError> {
        Ok(Self {
            status: bytes[0],
            chs_first: read_fixed::<3>(bytes, 1)?,
            kind: bytes[4],
            chs_last: read_fixed::<3>(bytes, 5)?,
            first_lba: read_le_u32(bytes, 8)?,
            sectors: read_le_u32(bytes, 12)?,
        })
    }

    /// Absolute byte offset of the partition on the disk.
    #[must_use]
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.first_lba) * SECTOR_SIZE
    }

    /// Partition length in bytes.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        u64::from(self.sectors) * SECTOR_SIZE
    }

    /// Whether the type byte marks a native Linux partition.
    #[must_use]
    pub fn is_linux(&self) -> bool {
        self.kind == PARTITION_TYPE_LINUX
    }

    /// Whether the slot holds a partition at all.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.kind != 0 && self.sectors != 0
    }
}

/// Read the four primary partition entries from the MBR at the start of `source`.
pub fn read_partition_table<S: ByteSource + ?Sized>(
    source: &mut S,
) -> Result<[PartitionEntry; 4]> {
    let mut raw = [0_u8; PARTITION_ENTRY_SIZE * 4];
    read_exact_at(source, PARTITION_TABLE_OFFSET, &mut raw)?;

    let mut entries = [PartitionEntry {
        status: 0,
        chs_first: [0; 3],
        kind: 0,
        chs_last: [0; 3],
        first_lba: 0,
        sectors: 0,
    }; 4];
    for (slot, chunk) in entries.iter_mut().zip(raw.chunks_exact(PARTITION_ENTRY_SIZE)) {
        *slot = PartitionEntry::parse(chunk)?;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Wrapper that returns at most one byte per read, to exercise the
    /// drive-to-completion loop.
    struct Trickle<T>(T);

    impl<T: Read> Read for Trickle<T> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let limit = buf.len().min(1);
            self.0.read(&mut buf[..limit])
        }
    }

    impl<T: Seek> Seek for Trickle<T> {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    fn disk_with_mbr() -> Vec<u8> {
        let mut disk = vec![0_u8; 1024];
        let base = 446;
        // Entry 0: bootable linux partition at LBA 2048, 131072 sectors.
        disk[base] = 0x80;
        disk[base + 4] = PARTITION_TYPE_LINUX;
        disk[base + 8..base + 12].copy_from_slice(&2048_u32.to_le_bytes());
        disk[base + 12..base + 16].copy_from_slice(&131_072_u32.to_le_bytes());
        // Entry 1: FAT32 partition.
        disk[base + 16 + 4] = 0x0C;
        disk[base + 16 + 8..base + 16 + 12].copy_from_slice(&63_u32.to_le_bytes());
        disk[base + 16 + 12..base + 16 + 16].copy_from_slice(&100_u32.to_le_bytes());
        disk
    }

    #[test]
    fn partition_table_decodes_all_four_slots() {
        let mut source = Cursor::new(disk_with_mbr());
        let parts = read_partition_table(&mut source).expect("partition table");

        assert!(parts[0].is_linux());
        assert!(parts[0].is_present());
        assert_eq!(parts[0].first_lba, 2048);
        assert_eq!(parts[0].byte_offset(), 2048 * 512);
        assert_eq!(parts[0].byte_len(), 131_072 * 512);

        assert_eq!(parts[1].kind, 0x0C);
        assert!(!parts[1].is_linux());
        assert!(!parts[2].is_present());
        assert!(!parts[3].is_present());
    }

    #[test]
    fn read_exact_into_drives_short_reads() {
        let mut source = Trickle(Cursor::new(disk_with_mbr()));
        let parts = read_partition_table(&mut source).expect("trickled table");
        assert_eq!(parts[0].first_lba, 2048);
    }

    #[test]
    fn premature_end_surfaces_as_io() {
        let mut source = Cursor::new(vec![0_u8; 450]);
        let err = read_partition_table(&mut source).unwrap_err();
        match err {
            PeekError::Io(io) => assert_eq!(io.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn seek_past_end_then_read_reports_end_of_stream() {
        let mut source = Cursor::new(vec![0_u8; 16]);
        let mut buf = [0_u8; 4];
        let err = read_exact_at(&mut source, 1024, &mut buf).unwrap_err();
        assert!(matches!(err, PeekError::Io(_)));
    }
}

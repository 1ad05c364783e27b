//! Linear byte stream over an inode's extents.
//!
//! One chunk plan (a flat list of `(physical_offset, length)` runs with
//! zero-fill gaps) drives both the incremental `io::Read` path and the
//! batched `copy_to` path, so the two cannot disagree on edge cases.

use crate::{ByteSource, Reader};
use peekfs_error::{PeekError, Result};
use peekfs_ondisk::{Extent, Inode};
use peekfs_source::read_exact_at;
use peekfs_types::ParseError;
use std::io::{self, Read, Write};
use tracing::debug;

/// Batching buffer for bulk copies. Extent chunks below this size are read in
/// one transaction; larger ones stream through a buffer of exactly this size.
/// Small buffered copies over a range-request source cost one round trip
/// each, so the buffer is deliberately large.
const COPY_BUF_SIZE: usize = 4 * 1024 * 1024;

/// One contiguous run of the logical byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    /// Absolute source offset of the run, or `None` for zero bytes (holes
    /// and uninitialized extents).
    pub physical: Option<u64>,
    pub len: u64,
}

/// Flatten sorted extents into chunks covering exactly `size` bytes.
///
/// Logical blocks covered by no extent, and blocks inside uninitialized
/// extents, become zero-fill chunks. `base` is the partition's byte offset
/// on the source.
pub(crate) fn chunk_plan(
    extents: &[Extent],
    size: u64,
    block_size: u64,
    base: u64,
) -> std::result::Result<Vec<Chunk>, ParseError> {
    let overflow = ParseError::InvalidField {
        field: "extent",
        reason: "physical offset overflow",
    };

    let mut chunks = Vec::new();
    let mut pos = 0_u64;

    for ext in extents {
        if pos >= size {
            break;
        }
        let ext_start = u64::from(ext.logical_block) * block_size;
        let ext_len = u64::from(ext.actual_len()) * block_size;
        let ext_end = ext_start + ext_len;
        if ext_end <= pos {
            continue;
        }

        if ext_start > pos {
            let hole = (ext_start - pos).min(size - pos);
            chunks.push(Chunk {
                physical: None,
                len: hole,
            });
            pos += hole;
            if pos >= size {
                break;
            }
        }

        let within = pos - ext_start;
        let avail = (ext_len - within).min(size - pos);
        if avail == 0 {
            continue;
        }
        if ext.is_uninitialized() {
            chunks.push(Chunk {
                physical: None,
                len: avail,
            });
        } else {
            let physical = ext
                .physical_start
                .checked_mul(block_size)
                .and_then(|byte| byte.checked_add(base))
                .and_then(|byte| byte.checked_add(within))
                .ok_or_else(|| overflow.clone())?;
            chunks.push(Chunk {
                physical: Some(physical),
                len: avail,
            });
        }
        pos += avail;
    }

    // Trailing hole: the file is larger than its last extent.
    if pos < size {
        chunks.push(Chunk {
            physical: None,
            len: size - pos,
        });
    }

    Ok(chunks)
}

/// Sequential read stream over one inode's content.
///
/// Yields exactly the inode's logical size, then end-of-file. Borrows the
/// reader mutably for its whole life: the byte source has one cursor.
pub struct InodeStream<'r, S> {
    reader: &'r mut Reader<S>,
    chunks: Vec<Chunk>,
    chunk_idx: usize,
    pos_in_chunk: u64,
}

impl<S: ByteSource> Reader<S> {
    /// Open a sequential stream over `inode`'s content.
    pub fn inode_stream(&mut self, inode: &Inode) -> Result<InodeStream<'_, S>> {
        let extents = self.extents(inode)?;
        let chunks = chunk_plan(
            &extents,
            inode.size,
            self.superblock().block_size.as_u64(),
            self.start,
        )?;
        Ok(InodeStream {
            reader: self,
            chunks,
            chunk_idx: 0,
            pos_in_chunk: 0,
        })
    }
}

impl<S: ByteSource> InodeStream<'_, S> {
    /// Bytes left until end-of-file.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        let mut left = 0;
        for (idx, chunk) in self.chunks.iter().enumerate().skip(self.chunk_idx) {
            left += chunk.len;
            if idx == self.chunk_idx {
                left -= self.pos_in_chunk;
            }
        }
        left
    }

    fn advance_chunk(&mut self) {
        self.chunk_idx += 1;
        self.pos_in_chunk = 0;
    }

    /// Drain the rest of the stream into `sink`, batching per extent.
    ///
    /// Chunks under the batching threshold are fetched in a single
    /// seek-and-read transaction; larger ones stream through one fixed
    /// buffer. Returns the number of bytes written.
    #[allow(clippy::cast_possible_truncation)] // lengths are clamped to buffer sizes
    pub fn copy_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64> {
        let mut total = 0_u64;

        while self.chunk_idx < self.chunks.len() {
            let chunk = self.chunks[self.chunk_idx];
            let len = chunk.len - self.pos_in_chunk;
            if len == 0 {
                self.advance_chunk();
                continue;
            }

            match chunk.physical {
                None => {
                    let zeros = vec![0_u8; len.min(COPY_BUF_SIZE as u64) as usize];
                    let mut left = len;
                    while left > 0 {
                        let n = left.min(zeros.len() as u64) as usize;
                        sink.write_all(&zeros[..n])?;
                        left -= n as u64;
                    }
                }
                Some(physical) => {
                    let start = physical + self.pos_in_chunk;
                    if len < COPY_BUF_SIZE as u64 {
                        let mut buf = vec![0_u8; len as usize];
                        read_exact_at(self.reader.source_mut(), start, &mut buf)?;
                        sink.write_all(&buf)?;
                    } else {
                        let source = self.reader.source_mut();
                        source.seek_to(start)?;
                        let mut buf = vec![0_u8; COPY_BUF_SIZE];
                        let mut left = len;
                        while left > 0 {
                            let n = left.min(COPY_BUF_SIZE as u64) as usize;
                            source.read_exact_into(&mut buf[..n])?;
                            sink.write_all(&buf[..n])?;
                            left -= n as u64;
                        }
                    }
                }
            }

            total += len;
            self.advance_chunk();
        }

        debug!(target: "peekfs::reader", bytes = total, "drained inode stream");
        Ok(total)
    }
}

impl<S: ByteSource> Read for InodeStream<'_, S> {
    #[allow(clippy::cast_possible_truncation)] // take is clamped to buf.len()
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0_usize;

        while filled < buf.len() {
            while self.chunk_idx < self.chunks.len()
                && self.pos_in_chunk == self.chunks[self.chunk_idx].len
            {
                self.advance_chunk();
            }
            if self.chunk_idx == self.chunks.len() {
                break; // end of file
            }

            let chunk = self.chunks[self.chunk_idx];
            let avail = chunk.len - self.pos_in_chunk;
            let take = avail.min((buf.len() - filled) as u64) as usize;
            let dest = &mut buf[filled..filled + take];

            match chunk.physical {
                None => dest.fill(0),
                Some(physical) => {
                    read_exact_at(
                        self.reader.source_mut(),
                        physical + self.pos_in_chunk,
                        dest,
                    )
                    .map_err(into_io)?;
                }
            }

            self.pos_in_chunk += take as u64;
            filled += take;
        }

        Ok(filled)
    }
}

fn into_io(err: PeekError) -> io::Error {
    match err {
        PeekError::Io(io) => io,
        other => io::Error::other(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(logical: u32, len: u16, physical: u64) -> Extent {
        Extent {
            logical_block: logical,
            raw_len: len,
            physical_start: physical,
        }
    }

    #[test]
    fn plan_covers_contiguous_extents() {
        let extents = [ext(0, 2, 100), ext(2, 1, 300)];
        let chunks = chunk_plan(&extents, 3 * 4096, 4096, 0).expect("plan");
        assert_eq!(
            chunks,
            [
                Chunk {
                    physical: Some(100 * 4096),
                    len: 2 * 4096
                },
                Chunk {
                    physical: Some(300 * 4096),
                    len: 4096
                },
            ]
        );
    }

    #[test]
    fn plan_clamps_final_extent_to_size() {
        let extents = [ext(0, 2, 100)];
        let chunks = chunk_plan(&extents, 4096 + 13, 4096, 0).expect("plan");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len, 4096 + 13);
    }

    #[test]
    fn plan_fills_holes_with_zero_chunks() {
        // Block 0 uncovered, blocks 1..3 mapped, trailing hole to size.
        let extents = [ext(1, 2, 50)];
        let chunks = chunk_plan(&extents, 4 * 4096, 4096, 0).expect("plan");
        assert_eq!(
            chunks,
            [
                Chunk {
                    physical: None,
                    len: 4096
                },
                Chunk {
                    physical: Some(50 * 4096),
                    len: 2 * 4096
                },
                Chunk {
                    physical: None,
                    len: 4096
                },
            ]
        );
    }

    #[test]
    fn plan_zeroes_uninitialized_extents() {
        let extents = [ext(0, 1, 10), ext(1, 32768 + 2, 11)];
        let chunks = chunk_plan(&extents, 3 * 4096, 4096, 0).expect("plan");
        assert_eq!(chunks[0].physical, Some(10 * 4096));
        assert_eq!(chunks[1], Chunk {
            physical: None,
            len: 2 * 4096
        });
    }

    #[test]
    fn plan_applies_partition_base() {
        let extents = [ext(0, 1, 5)];
        let chunks = chunk_plan(&extents, 4096, 4096, 1_048_576).expect("plan");
        assert_eq!(chunks[0].physical, Some(1_048_576 + 5 * 4096));
    }

    #[test]
    fn plan_of_empty_file_is_empty() {
        let chunks = chunk_plan(&[], 0, 4096, 0).expect("plan");
        assert!(chunks.is_empty());
    }

    #[test]
    fn plan_overflow_is_rejected() {
        let extents = [ext(0, 1, u64::MAX / 2)];
        assert!(chunk_plan(&extents, 4096, 4096, 0).is_err());
    }
}

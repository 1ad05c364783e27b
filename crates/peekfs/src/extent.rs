//! Extent-tree walking.
//!
//! Flattens an inode's extent tree into the leaf extents in on-disk order.
//! The root lives in the inode's 60-byte data area; deeper nodes occupy full
//! blocks reached through index records.

use crate::{ByteSource, Reader};
use peekfs_error::{PeekError, Result};
use peekfs_ondisk::{parse_extent_node, Extent, ExtentNode, Inode};
use peekfs_types::ParseError;
use tracing::trace;

/// The on-disk format bounds the tree at five levels.
const MAX_EXTENT_DEPTH: u16 = 5;

impl<S: ByteSource> Reader<S> {
    /// Collect the leaf extents of `inode`, in on-disk (logical) order.
    ///
    /// Uninitialized extents are kept, tagged, with corrected lengths; the
    /// data stream turns them into zero bytes.
    pub fn extents(&mut self, inode: &Inode) -> Result<Vec<Extent>> {
        if inode.has_inline_data() {
            return Err(PeekError::UnsupportedInode("inode stores inline data"));
        }
        if !inode.uses_extents() {
            return Err(PeekError::UnsupportedInode(
                "block-map inode without the extents flag",
            ));
        }

        let (header, node) = parse_extent_node(&inode.data)?;
        if header.depth > MAX_EXTENT_DEPTH {
            return Err(ParseError::InvalidField {
                field: "eh_depth",
                reason: "extent tree depth exceeds maximum",
            }
            .into());
        }

        let mut extents = Vec::new();
        self.collect_node(&node, header.depth, &mut extents)?;
        trace!(
            target: "peekfs::reader",
            extents = extents.len(),
            depth = header.depth,
            "walked extent tree"
        );
        Ok(extents)
    }

    fn collect_node(
        &mut self,
        node: &ExtentNode,
        depth: u16,
        out: &mut Vec<Extent>,
    ) -> Result<()> {
        match node {
            ExtentNode::Leaf(extents) => {
                out.extend_from_slice(extents);
                Ok(())
            }
            ExtentNode::Index(indexes) => {
                for idx in indexes {
                    let offset = self.block_offset(idx.child_block)?;
                    let mut raw = vec![0_u8; self.superblock().block_size.get() as usize];
                    self.read_at(offset, &mut raw)?;

                    let (child_header, child_node) = parse_extent_node(&raw)?;
                    if child_header.depth != depth - 1 {
                        return Err(ParseError::InvalidField {
                            field: "eh_depth",
                            reason: "child extent node depth inconsistency",
                        }
                        .into());
                    }
                    self.collect_node(&child_node, child_header.depth, out)?;
                }
                Ok(())
            }
        }
    }
}

use peekfs_types::{
    ensure_slice, read_fixed, read_le_u16, read_le_u32, trim_nul_padded, BlockSize, GroupNumber,
    InodeNumber, ParseError, EXT4_EXTENTS_FL, EXT4_INLINE_DATA_FL, EXT4_SUPER_MAGIC, S_IFDIR,
    S_IFLNK, S_IFMT, S_IFREG, SUPERBLOCK_SIZE,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ext4 extent header magic.
pub const EXT4_EXTENT_MAGIC: u16 = 0xF30A;
/// Extent lengths above this mark uninitialized extents.
const EXT_INIT_MAX_LEN: u16 = 1_u16 << 15;

// ext4 incompat feature flags (subset this reader knows by name)
pub const INCOMPAT_COMPRESSION: u32 = 0x0001;
pub const INCOMPAT_FILETYPE: u32 = 0x0002;
pub const INCOMPAT_RECOVER: u32 = 0x0004;
pub const INCOMPAT_JOURNAL_DEV: u32 = 0x0008;
pub const INCOMPAT_META_BG: u32 = 0x0010;
pub const INCOMPAT_EXTENTS: u32 = 0x0040;
pub const INCOMPAT_64BIT: u32 = 0x0080;
pub const INCOMPAT_MMP: u32 = 0x0100;
pub const INCOMPAT_FLEX_BG: u32 = 0x0200;
pub const INCOMPAT_INLINE_DATA: u32 = 0x8000;
pub const INCOMPAT_ENCRYPT: u32 = 0x0001_0000;

/// Incompat bits this reader can open. Anything outside refuses the mount.
pub const INCOMPAT_SUPPORTED_MASK: u32 =
    INCOMPAT_FILETYPE | INCOMPAT_EXTENTS | INCOMPAT_64BIT | INCOMPAT_FLEX_BG | INCOMPAT_RECOVER;

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    // ── Geometry ─────────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u64,
    pub first_data_block: u32,
    pub block_size: BlockSize,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub desc_size: u16,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub uuid: [u8; 16],
    pub volume_name: String,

    // ── State ────────────────────────────────────────────────────────────
    pub rev_level: u32,
    pub state: u16,
    pub mtime: u32,
    pub wtime: u32,

    // ── Features ─────────────────────────────────────────────────────────
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
}

impl Superblock {
    /// Parse a superblock from its 1024-byte on-disk region.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u16(region, 0x38)?;
        if magic != EXT4_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EXT4_SUPER_MAGIC),
                actual: u64::from(magic),
            });
        }

        let log_block_size = read_le_u32(region, 0x18)?;
        let block_size = peekfs_types::block_size_from_log(log_block_size)
            .ok_or(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "invalid shift",
            })
            .and_then(BlockSize::new)?;

        let feature_incompat = read_le_u32(region, 0x60)?;

        let blocks_lo = u64::from(read_le_u32(region, 0x04)?);
        // The high half is only meaningful with the 64bit feature; stale
        // bytes there on 32-bit filesystems must read as zero.
        let blocks_hi = if feature_incompat & INCOMPAT_64BIT != 0 {
            u64::from(read_le_u32(region, 0x150)?)
        } else {
            0
        };

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: blocks_lo | (blocks_hi << 32),
            first_data_block: read_le_u32(region, 0x14)?,
            block_size,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,
            inode_size: read_le_u16(region, 0x58)?,
            desc_size: read_le_u16(region, 0xFE)?,

            magic,
            uuid: read_fixed::<16>(region, 0x68)?,
            volume_name: trim_nul_padded(&read_fixed::<16>(region, 0x78)?),

            rev_level: read_le_u32(region, 0x4C)?,
            state: read_le_u16(region, 0x3A)?,
            mtime: read_le_u32(region, 0x2C)?,
            wtime: read_le_u32(region, 0x30)?,

            feature_compat: read_le_u32(region, 0x5C)?,
            feature_incompat,
            feature_ro_compat: read_le_u32(region, 0x64)?,
        })
    }

    #[must_use]
    pub fn is_64bit(&self) -> bool {
        self.feature_incompat & INCOMPAT_64BIT != 0
    }

    /// Incompat bits present on disk that this reader does not support.
    #[must_use]
    pub fn unsupported_incompat(&self) -> u32 {
        self.feature_incompat & !INCOMPAT_SUPPORTED_MASK
    }

    /// Size of one group descriptor: `desc_size` (min 64) with the 64bit
    /// feature, 32 bytes without.
    #[must_use]
    pub fn group_desc_size(&self) -> u16 {
        if self.is_64bit() {
            self.desc_size.max(64)
        } else {
            32
        }
    }

    /// Byte offset of a group descriptor, relative to the partition start.
    ///
    /// The descriptor table occupies the block after the superblock: block 1
    /// for >= 2 KiB blocks, block 2 when blocks are 1 KiB.
    #[must_use]
    pub fn group_desc_offset(&self, group: GroupNumber) -> Option<u64> {
        let gdt_block = if self.block_size.get() == 1024 { 2 } else { 1 };
        let gdt_start = gdt_block * self.block_size.as_u64();
        let desc = u64::from(group.0).checked_mul(u64::from(self.group_desc_size()))?;
        gdt_start.checked_add(desc)
    }

    /// Locate an inode: its block group and byte offset within that group's
    /// inode table.
    #[must_use]
    pub fn inode_location(&self, ino: InodeNumber) -> (GroupNumber, u64) {
        let group = peekfs_types::inode_to_group(ino, self.inodes_per_group);
        let index = peekfs_types::inode_index_in_group(ino, self.inodes_per_group);
        (group, u64::from(index) * u64::from(self.inode_size))
    }

    /// Canonical hyphenated rendering of the volume UUID.
    #[must_use]
    pub fn uuid_string(&self) -> String {
        let u = &self.uuid;
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12],
            u[13], u[14], u[15]
        )
    }
}

// ── Group descriptor ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDesc {
    pub block_bitmap: u64,
    pub inode_bitmap: u64,
    pub inode_table: u64,
    pub flags: u16,
    pub checksum: u16,
}

impl GroupDesc {
    /// Parse a descriptor record. `desc_size` below 64 means the 64-bit
    /// halves do not exist and every location is the low 32 bits alone.
    pub fn parse_from_bytes(bytes: &[u8], desc_size: u16) -> Result<Self, ParseError> {
        let desc_size = usize::from(desc_size);
        if desc_size < 32 {
            return Err(ParseError::InvalidField {
                field: "s_desc_size",
                reason: "descriptor size must be >= 32",
            });
        }
        if bytes.len() < desc_size {
            return Err(ParseError::InsufficientData {
                needed: desc_size,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let block_bitmap_lo = u64::from(read_le_u32(bytes, 0x00)?);
        let inode_bitmap_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let inode_table_lo = u64::from(read_le_u32(bytes, 0x08)?);
        let flags = read_le_u16(bytes, 0x12)?;
        let checksum = read_le_u16(bytes, 0x1E)?;

        let (block_bitmap_hi, inode_bitmap_hi, inode_table_hi) = if desc_size >= 64 {
            (
                u64::from(read_le_u32(bytes, 0x20)?),
                u64::from(read_le_u32(bytes, 0x24)?),
                u64::from(read_le_u32(bytes, 0x28)?),
            )
        } else {
            (0, 0, 0)
        };

        Ok(Self {
            block_bitmap: block_bitmap_lo | (block_bitmap_hi << 32),
            inode_bitmap: inode_bitmap_lo | (inode_bitmap_hi << 32),
            inode_table: inode_table_lo | (inode_table_hi << 32),
            flags,
            checksum,
        })
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// Size of the inode's embedded block/extent/symlink data area.
pub const INODE_DATA_LEN: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub links_count: u16,
    pub flags: u32,
    pub generation: u32,

    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    /// The 60-byte `i_block` area: extent-tree root, block map, or inline
    /// symlink target.
    pub data: Vec<u8>,
}

impl Inode {
    /// Parse an inode record. Requires at least the 128-byte base layout.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < 128 {
            return Err(ParseError::InsufficientData {
                needed: 128,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let uid_lo = u32::from(read_le_u16(bytes, 0x02)?);
        let gid_lo = u32::from(read_le_u16(bytes, 0x18)?);
        let uid_hi = u32::from(read_le_u16(bytes, 0x78)?);
        let gid_hi = u32::from(read_le_u16(bytes, 0x7A)?);

        let size_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let size_hi = u64::from(read_le_u32(bytes, 0x6C)?);

        Ok(Self {
            mode: read_le_u16(bytes, 0x00)?,
            uid: uid_lo | (uid_hi << 16),
            gid: gid_lo | (gid_hi << 16),
            size: size_lo | (size_hi << 32),
            links_count: read_le_u16(bytes, 0x1A)?,
            flags: read_le_u32(bytes, 0x20)?,
            generation: read_le_u32(bytes, 0x64)?,

            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,

            data: ensure_slice(bytes, 0x28, INODE_DATA_LEN)?.to_vec(),
        })
    }

    #[must_use]
    pub fn uses_extents(&self) -> bool {
        self.flags & EXT4_EXTENTS_FL != 0
    }

    #[must_use]
    pub fn has_inline_data(&self) -> bool {
        self.flags & EXT4_INLINE_DATA_FL != 0
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Fast-symlink target stored inline in the data area, if any.
    ///
    /// Targets of 60 bytes or more live in regular data blocks instead.
    #[must_use]
    pub fn inline_symlink_target(&self) -> Option<&[u8]> {
        if self.is_symlink() && self.size < peekfs_types::FAST_SYMLINK_MAX {
            let len = self.size as usize;
            self.data.get(..len)
        } else {
            None
        }
    }
}

// ── Extent tree nodes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentHeader {
    pub magic: u16,
    pub entries: u16,
    pub max_entries: u16,
    pub depth: u16,
    pub generation: u32,
}

/// One leaf extent: a contiguous run of a file's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First logical block covered.
    pub logical_block: u32,
    /// On-disk length field; bit 15 encodes the uninitialized state.
    pub raw_len: u16,
    /// First physical block of the run.
    pub physical_start: u64,
}

impl Extent {
    /// Whether the extent is allocated but never written; reads are zeros.
    #[must_use]
    pub fn is_uninitialized(self) -> bool {
        self.raw_len > EXT_INIT_MAX_LEN
    }

    /// Covered block count with the uninitialized bit stripped.
    #[must_use]
    pub fn actual_len(self) -> u16 {
        if self.raw_len > EXT_INIT_MAX_LEN {
            self.raw_len - EXT_INIT_MAX_LEN
        } else {
            self.raw_len
        }
    }
}

/// One index record pointing at a lower extent-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentIndex {
    /// First logical block covered by the subtree.
    pub logical_block: u32,
    /// Physical block of the child node.
    pub child_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtentNode {
    Leaf(Vec<Extent>),
    Index(Vec<ExtentIndex>),
}

/// Parse one extent-tree node (the inode's 60-byte root or a full block).
pub fn parse_extent_node(bytes: &[u8]) -> Result<(ExtentHeader, ExtentNode), ParseError> {
    if bytes.len() < 12 {
        return Err(ParseError::InsufficientData {
            needed: 12,
            offset: 0,
            actual: bytes.len(),
        });
    }

    let header = ExtentHeader {
        magic: read_le_u16(bytes, 0x00)?,
        entries: read_le_u16(bytes, 0x02)?,
        max_entries: read_le_u16(bytes, 0x04)?,
        depth: read_le_u16(bytes, 0x06)?,
        generation: read_le_u32(bytes, 0x08)?,
    };

    if header.magic != EXT4_EXTENT_MAGIC {
        return Err(ParseError::InvalidMagic {
            expected: u64::from(EXT4_EXTENT_MAGIC),
            actual: u64::from(header.magic),
        });
    }
    if header.entries > header.max_entries {
        return Err(ParseError::InvalidField {
            field: "eh_entries",
            reason: "entries exceed max",
        });
    }

    let entries = usize::from(header.entries);
    let needed = 12 + entries * 12;
    if bytes.len() < needed {
        return Err(ParseError::InsufficientData {
            needed,
            offset: 12,
            actual: bytes.len().saturating_sub(12),
        });
    }

    if header.depth == 0 {
        let mut extents = Vec::with_capacity(entries);
        for idx in 0..entries {
            let base = 12 + idx * 12;
            let start_hi = u64::from(read_le_u16(bytes, base + 6)?);
            let start_lo = u64::from(read_le_u32(bytes, base + 8)?);
            extents.push(Extent {
                logical_block: read_le_u32(bytes, base)?,
                raw_len: read_le_u16(bytes, base + 4)?,
                physical_start: start_lo | (start_hi << 32),
            });
        }
        Ok((header, ExtentNode::Leaf(extents)))
    } else {
        let mut indexes = Vec::with_capacity(entries);
        for idx in 0..entries {
            let base = 12 + idx * 12;
            let leaf_lo = u64::from(read_le_u32(bytes, base + 4)?);
            let leaf_hi = u64::from(read_le_u16(bytes, base + 8)?);
            indexes.push(ExtentIndex {
                logical_block: read_le_u32(bytes, base)?,
                child_block: leaf_lo | (leaf_hi << 32),
            });
        }
        Ok((header, ExtentNode::Index(indexes)))
    }
}

// ── Directory entries ───────────────────────────────────────────────────────

/// File type code carried in each directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0,
    Regular = 1,
    Directory = 2,
    CharDev = 3,
    BlockDev = 4,
    Fifo = 5,
    Socket = 6,
    Symlink = 7,
}

impl FileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::Regular,
            2 => Self::Directory,
            3 => Self::CharDev,
            4 => Self::BlockDev,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Regular => "File",
            Self::Directory => "Dir",
            Self::CharDev => "Chardev",
            Self::BlockDev => "Blockdev",
            Self::Fifo => "FIFO",
            Self::Socket => "Socket",
            Self::Symlink => "Symlink",
        };
        f.write_str(name)
    }
}

/// A live directory entry decoded from a directory inode's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryRecord {
    pub inode: u32,
    pub rec_len: u16,
    pub file_type: FileType,
    pub name: Vec<u8>,
}

impl DirEntryRecord {
    /// The name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Decode the packed entry records tiling a directory inode's full content.
///
/// Vacant slots (`inode == 0`, including checksum tails) are skipped but
/// their `rec_len` still advances the cursor, so padding is consumed exactly.
/// On-disk order is preserved.
pub fn parse_dir_entries(data: &[u8]) -> Result<Vec<DirEntryRecord>, ParseError> {
    let mut entries = Vec::new();
    let mut offset = 0_usize;

    while offset < data.len() {
        if offset + 8 > data.len() {
            return Err(ParseError::InsufficientData {
                needed: 8,
                offset,
                actual: data.len() - offset,
            });
        }
        let inode = read_le_u32(data, offset)?;
        let rec_len = read_le_u16(data, offset + 4)?;
        let name_len = data[offset + 6];
        let file_type_raw = data[offset + 7];

        if rec_len < 12 || rec_len % 4 != 0 {
            return Err(ParseError::InvalidField {
                field: "de_rec_len",
                reason: "below minimum or misaligned",
            });
        }
        if usize::from(rec_len) < 8 + usize::from(name_len) {
            return Err(ParseError::InvalidField {
                field: "de_name_len",
                reason: "name extends past rec_len",
            });
        }
        let entry_end = offset + usize::from(rec_len);
        if entry_end > data.len() {
            return Err(ParseError::InvalidField {
                field: "de_rec_len",
                reason: "entry extends past directory data",
            });
        }

        if inode != 0 {
            entries.push(DirEntryRecord {
                inode,
                rec_len,
                file_type: FileType::from_raw(file_type_raw),
                name: data[offset + 8..offset + 8 + usize::from(name_len)].to_vec(),
            });
        }

        offset = entry_end;
    }

    Ok(entries)
}

// ── Tests ───────────────────────────────────────────────────────────────────

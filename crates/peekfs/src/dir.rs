//! Directory traversal, glob matching, and symlink resolution.
//!
//! `Directory` and `DirEntry` are value snapshots; every operation that
//! touches the disk goes through `&mut Reader`, keeping the byte source's
//! cursor single-owner.

use crate::glob::segment_matches;
use crate::{ByteSource, Reader};
use peekfs_error::{PeekError, Result, SYMLINK_MAX_HOPS};
use peekfs_ondisk::{parse_dir_entries, FileType, Inode};
use peekfs_types::InodeNumber;
use serde::{Deserialize, Serialize};

/// A directory position: inode snapshot plus absolute path prefix ending in `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    ino: InodeNumber,
    inode: Inode,
    path: String,
}

impl Directory {
    /// Absolute path of the directory, ending in `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    #[must_use]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }
}

/// One live directory entry with enough context to be re-resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Inode the entry points to.
    pub ino: InodeNumber,
    /// Type code recorded in the entry itself.
    pub file_type: FileType,
    /// Entry name (UTF-8, lossy).
    pub name: String,
    parent_ino: InodeNumber,
    parent_path: String,
}

impl DirEntry {
    /// Absolute path of the entry.
    #[must_use]
    pub fn full_path(&self) -> String {
        format!("{}{}", self.parent_path, self.name)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.file_type == FileType::Regular
    }
}

/// Split a path or glob into its non-empty segments.
///
/// Consecutive separators collapse; leading and trailing separators vanish.
fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}

impl<S: ByteSource> Reader<S> {
    /// The root directory (inode 2, path `/`).
    pub fn root(&mut self) -> Result<Directory> {
        let inode = self.inode(InodeNumber::ROOT)?;
        Ok(Directory {
            ino: InodeNumber::ROOT,
            inode,
            path: "/".to_owned(),
        })
    }

    /// List the directory's entries in on-disk order, vacant slots filtered.
    pub fn entries(&mut self, dir: &Directory) -> Result<Vec<DirEntry>> {
        if !dir.inode.is_dir() {
            return Err(PeekError::NotADirectory(dir.path.clone()));
        }
        let data = self.inode_content(&dir.inode)?;
        let records = parse_dir_entries(&data)?;
        Ok(records
            .into_iter()
            .map(|record| DirEntry {
                ino: InodeNumber(record.inode),
                file_type: record.file_type,
                name: record.name_str(),
                parent_ino: dir.ino,
                parent_path: dir.path.clone(),
            })
            .collect())
    }

    fn find_entry(&mut self, dir: &Directory, name: &str) -> Result<DirEntry> {
        self.entries(dir)?
            .into_iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| PeekError::NotFound(format!("{}{name}", dir.path)))
    }

    /// Entries of `dir` whose names match one glob segment.
    ///
    /// `.` and `..` only match a literally identical segment.
    fn glob_entries(&mut self, dir: &Directory, segment: &str) -> Result<Vec<DirEntry>> {
        Ok(self
            .entries(dir)?
            .into_iter()
            .filter(|entry| {
                if entry.name == "." && segment != "." {
                    return false;
                }
                if entry.name == ".." && segment != ".." {
                    return false;
                }
                segment_matches(segment, &entry.name)
            })
            .collect())
    }

    /// Walk `path` downward from `dir`, following symlinks.
    ///
    /// An empty path (or bare separators) returns `dir` itself, so
    /// `change_dir(&root, "/")` equals `root()`.
    pub fn change_dir(&mut self, dir: &Directory, path: &str) -> Result<Directory> {
        let mut current = dir.clone();
        for segment in split_path(path) {
            let mut entry = self.find_entry(&current, &segment)?;
            if entry.is_symlink() {
                entry = self.resolve_symlink(&entry)?;
            }
            if !entry.is_dir() {
                return Err(PeekError::NotADirectory(entry.full_path()));
            }
            let inode = self.inode(entry.ino)?;
            current = Directory {
                ino: entry.ino,
                inode,
                path: format!("{}{segment}/", current.path),
            };
        }
        Ok(current)
    }

    /// Match a path glob against the tree below `dir`.
    ///
    /// Intermediate segments descend into matching directories; the final
    /// segment returns matching entries of any type.
    pub fn match_glob(&mut self, dir: &Directory, pattern: &str) -> Result<Vec<DirEntry>> {
        let segments = split_path(pattern);
        if segments.is_empty() {
            return Ok(Vec::new());
        }
        self.match_segments(dir, &segments)
    }

    fn match_segments(&mut self, dir: &Directory, segments: &[String]) -> Result<Vec<DirEntry>> {
        let matched = self.glob_entries(dir, &segments[0])?;
        if segments.len() == 1 {
            return Ok(matched);
        }
        let mut out = Vec::new();
        for entry in matched {
            if entry.is_dir() {
                let child = self.change_dir(dir, &entry.name)?;
                out.extend(self.match_segments(&child, &segments[1..])?);
            }
        }
        Ok(out)
    }

    /// Read a symlink's target string.
    ///
    /// Targets under 60 bytes live inline in the inode; longer ones go
    /// through the data stream.
    pub fn read_symlink(&mut self, entry: &DirEntry) -> Result<String> {
        if !entry.is_symlink() {
            return Err(PeekError::UnsupportedInode(
                "read_symlink on a non-symlink entry",
            ));
        }
        let inode = self.inode(entry.ino)?;
        if let Some(inline) = inode.inline_symlink_target() {
            return Ok(String::from_utf8_lossy(inline).into_owned());
        }
        let bytes = self.inode_content(&inode)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Follow a symlink chain to its first non-symlink entry.
    ///
    /// Each target is treated as a glob relative to the directory containing
    /// the link; the first match wins. Chains longer than
    /// [`SYMLINK_MAX_HOPS`] surface [`PeekError::SymlinkLoop`]. A non-symlink
    /// entry resolves to itself.
    pub fn resolve_symlink(&mut self, entry: &DirEntry) -> Result<DirEntry> {
        let mut current = entry.clone();
        for _ in 0..SYMLINK_MAX_HOPS {
            if !current.is_symlink() {
                return Ok(current);
            }
            let target = self.read_symlink(&current)?;
            let parent = self.directory_at(current.parent_ino, current.parent_path.clone())?;
            current = self
                .match_glob(&parent, &target)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    PeekError::NotFound(format!("{} -> {target}", current.full_path()))
                })?;
        }
        Err(PeekError::SymlinkLoop(entry.full_path()))
    }

    fn directory_at(&mut self, ino: InodeNumber, path: String) -> Result<Directory> {
        let inode = self.inode(ino)?;
        Ok(Directory { ino, inode, path })
    }
}

#[cfg(test)]
mod tests {
    use super::split_path;

    #[test]
    fn split_path_normalizes_separators() {
        assert_eq!(split_path("/etc/ssh"), ["etc", "ssh"]);
        assert_eq!(split_path("etc//ssh/"), ["etc", "ssh"]);
        assert_eq!(split_path("///"), Vec::<String>::new());
        assert_eq!(split_path(""), Vec::<String>::new());
        assert_eq!(split_path("a"), ["a"]);
    }
}

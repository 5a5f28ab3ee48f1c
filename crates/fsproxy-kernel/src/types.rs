//! Core node types.
//!
//! Every record here carries the registry identifier so the FUSE adapter
//! can answer without another registry lookup.

use std::time::SystemTime;

/// Node kind.
///
/// Only directories and everything-else are distinguished; symlinks and
/// special files are stat'ed through and reported as files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file (or anything that is not a directory).
    File,
    /// Directory.
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// Permission bits for proxied directories.
pub const DIRECTORY_PERM: u32 = 0o555;

/// Permission bits for proxied files.
pub const FILE_PERM: u32 = 0o444;

/// Precomputed node attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    /// Registry identifier (inode number).
    pub ino: u64,
    /// Node kind.
    pub kind: FileType,
    /// Unix permissions (e.g., 0o444).
    pub perm: u32,
    /// Size in bytes at lookup time.
    pub size: u64,
    /// Last modification time.
    pub mtime: SystemTime,
}

impl NodeAttr {
    /// Attributes for a directory.
    pub fn directory(ino: u64) -> Self {
        Self {
            ino,
            kind: FileType::Directory,
            perm: DIRECTORY_PERM,
            size: 0,
            mtime: SystemTime::UNIX_EPOCH,
        }
    }

    /// Attributes for a read-only file.
    pub fn file(ino: u64, size: u64) -> Self {
        Self {
            ino,
            kind: FileType::File,
            perm: FILE_PERM,
            size,
            mtime: SystemTime::UNIX_EPOCH,
        }
    }

    /// Copy size and mtime from real metadata.
    pub fn with_metadata(mut self, meta: &std::fs::Metadata) -> Self {
        if self.kind.is_file() {
            self.size = meta.len();
        }
        self.mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        self
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Registry identifier of the child.
    pub ino: u64,
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(ino: u64, name: impl Into<String>, kind: FileType) -> Self {
        Self {
            ino,
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(ino: u64, name: impl Into<String>) -> Self {
        Self::new(ino, name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(ino: u64, name: impl Into<String>) -> Self {
        Self::new(ino, name, FileType::Directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
    }

    #[test]
    fn test_node_attr_constructors() {
        let file = NodeAttr::file(12, 1024);
        assert!(file.is_file());
        assert_eq!(file.ino, 12);
        assert_eq!(file.size, 1024);
        assert_eq!(file.perm, 0o444);

        let dir = NodeAttr::directory(11);
        assert!(dir.is_dir());
        assert_eq!(dir.perm, 0o555);
        assert_eq!(dir.size, 0);
    }

    #[test]
    fn test_dir_entry() {
        let file = DirEntry::file(20, "test.txt");
        assert_eq!(file.name, "test.txt");
        assert_eq!(file.ino, 20);
        assert!(file.kind.is_file());

        let dir = DirEntry::directory(21, "subdir");
        assert!(dir.kind.is_dir());
    }
}

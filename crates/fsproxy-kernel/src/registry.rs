//! Path → inode registry.
//!
//! Identifiers are handed out on first sight and never reused, so the
//! kernel can treat them as stable handles for the life of the proxy.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Identifiers at or below this value are never allocated.
///
/// FUSE reserves inode 1 for the mount root, and the adapter keys the root
/// node under it, so registry identifiers must not collide with it.
pub const RESERVED_INODES: u64 = 10;

/// Thread-safe path → identifier map.
#[derive(Debug)]
pub struct InodeRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    by_path: HashMap<PathBuf, u64>,
    last: u64,
}

impl Default for InodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                by_path: HashMap::new(),
                last: RESERVED_INODES,
            }),
        }
    }

    /// Return the identifier for `path`, allocating one if unseen.
    pub fn identifier_for(&self, path: &Path) -> u64 {
        let mut inner = self.inner.lock();
        if let Some(&ino) = inner.by_path.get(path) {
            return ino;
        }
        inner.last += 1;
        let ino = inner.last;
        inner.by_path.insert(path.to_path_buf(), ino);
        ino
    }

    /// Look up `path` without allocating.
    pub fn get(&self, path: &Path) -> Option<u64> {
        self.inner.lock().by_path.get(path).copied()
    }

    /// Number of paths seen so far.
    pub fn len(&self) -> usize {
        self.inner.lock().by_path.len()
    }

    /// Returns true if no path has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

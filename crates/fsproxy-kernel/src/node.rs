//! Directory and file nodes.
//!
//! A [`Node`] is what the FUSE adapter holds for every inode the kernel
//! knows about. The base [`Directory`] and [`File`] nodes forward every
//! operation to the hooks installed on their [`Proxy`]. A host that wants to
//! change a single operation wraps a base node in its own type, implements
//! [`DirectoryNode`] or [`FileNode`], and delegates everything else:
//!
//! ```ignore
//! struct Shouting(Arc<dyn FileNode>);
//!
//! #[async_trait]
//! impl FileNode for Shouting {
//!     fn path(&self) -> &Path { self.0.path() }
//!     fn attributes(&self) -> &NodeAttr { self.0.attributes() }
//!     async fn read_all(&self, cancel: &CancellationToken) -> FsResult<Vec<u8>> {
//!         Ok(self.0.read_all(cancel).await?.to_ascii_uppercase())
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};
use crate::proxy::Proxy;
use crate::types::{DirEntry, NodeAttr};

/// Directory behaviour exposed to the protocol runtime.
#[async_trait]
pub trait DirectoryNode: Send + Sync {
    /// Path of this directory in the source tree.
    fn path(&self) -> &Path;

    /// Attributes computed when the node was built.
    fn attributes(&self) -> &NodeAttr;

    /// Enumerate immediate children.
    async fn list_entries(&self, cancel: &CancellationToken) -> FsResult<Vec<DirEntry>>;

    /// Resolve a child by name.
    async fn resolve_child(&self, name: &str, cancel: &CancellationToken) -> FsResult<Node>;
}

/// File behaviour exposed to the protocol runtime.
#[async_trait]
pub trait FileNode: Send + Sync {
    /// Path of this file in the source tree.
    fn path(&self) -> &Path;

    /// Attributes computed when the node was built.
    fn attributes(&self) -> &NodeAttr;

    /// Read the whole file.
    async fn read_all(&self, cancel: &CancellationToken) -> FsResult<Vec<u8>>;
}

/// A node handed to the protocol runtime.
///
/// Nodes are built fresh on every lookup and never deduplicated; two
/// lookups of one path give two values with the same identifier.
#[derive(Clone)]
pub enum Node {
    Directory(Arc<dyn DirectoryNode>),
    File(Arc<dyn FileNode>),
}

impl Node {
    /// Attributes of the underlying node.
    pub fn attributes(&self) -> &NodeAttr {
        match self {
            Node::Directory(dir) => dir.attributes(),
            Node::File(file) => file.attributes(),
        }
    }

    /// Source path of the underlying node.
    pub fn path(&self) -> &Path {
        match self {
            Node::Directory(dir) => dir.path(),
            Node::File(file) => file.path(),
        }
    }

    /// Returns true if this is a directory node.
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    /// The directory behind this node, if it is one.
    pub fn as_directory(&self) -> Option<&Arc<dyn DirectoryNode>> {
        match self {
            Node::Directory(dir) => Some(dir),
            Node::File(_) => None,
        }
    }

    /// The file behind this node, if it is one.
    pub fn as_file(&self) -> Option<&Arc<dyn FileNode>> {
        match self {
            Node::File(file) => Some(file),
            Node::Directory(_) => None,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = if self.is_dir() { "Directory" } else { "File" };
        f.debug_struct(variant)
            .field("path", &self.path())
            .field("ino", &self.attributes().ino)
            .finish()
    }
}

/// Base directory node, dispatching to the proxy's List and Lookup hooks.
#[derive(Debug, Clone)]
pub struct Directory {
    proxy: Arc<Proxy>,
    path: PathBuf,
    attr: NodeAttr,
}

impl Directory {
    /// Bind `path` to `proxy` with precomputed attributes.
    pub fn new(proxy: Arc<Proxy>, path: PathBuf, attr: NodeAttr) -> Self {
        Self { proxy, path, attr }
    }
}

#[async_trait]
impl DirectoryNode for Directory {
    fn path(&self) -> &Path {
        &self.path
    }

    fn attributes(&self) -> &NodeAttr {
        &self.attr
    }

    async fn list_entries(&self, cancel: &CancellationToken) -> FsResult<Vec<DirEntry>> {
        tracing::debug!(path = %self.path.display(), "reading directory");
        until_cancelled(cancel, self.proxy.list(self.path.clone())).await
    }

    async fn resolve_child(&self, name: &str, cancel: &CancellationToken) -> FsResult<Node> {
        validate_child_name(name)?;
        let path = self.path.join(name);
        tracing::debug!(path = %path.display(), "looking up child");
        until_cancelled(cancel, self.proxy.lookup(path, cancel.clone())).await
    }
}

/// Base file node, dispatching to the proxy's ReadAll hook.
#[derive(Debug, Clone)]
pub struct File {
    proxy: Arc<Proxy>,
    path: PathBuf,
    attr: NodeAttr,
}

impl File {
    /// Bind `path` to `proxy` with precomputed attributes.
    pub fn new(proxy: Arc<Proxy>, path: PathBuf, attr: NodeAttr) -> Self {
        Self { proxy, path, attr }
    }
}

#[async_trait]
impl FileNode for File {
    fn path(&self) -> &Path {
        &self.path
    }

    fn attributes(&self) -> &NodeAttr {
        &self.attr
    }

    async fn read_all(&self, cancel: &CancellationToken) -> FsResult<Vec<u8>> {
        until_cancelled(cancel, self.proxy.read_all(self.path.clone())).await
    }
}

/// Race `fut` against cancellation of the request.
pub async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = FsResult<T>>,
) -> FsResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FsError::Interrupted),
        result = fut => result,
    }
}

/// A child name must be a single, real path component.
fn validate_child_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(FsError::invalid_path(name));
    }
    Ok(())
}

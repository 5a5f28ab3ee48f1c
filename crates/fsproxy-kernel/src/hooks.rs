//! Replaceable List / Lookup / ReadAll operations.
//!
//! Each hook is a plain function value stored on the [`Proxy`]. A host
//! replaces one by installing a closure, usually one that calls the matching
//! `default_*` function and rewrites its result:
//!
//! ```ignore
//! let proxy = Proxy::new("/mnt/view", "/srv/data").with_read_all(|proxy, path| async move {
//!     let bytes = default_read_all(proxy, path).await?;
//!     Ok(bytes.to_ascii_uppercase())
//! });
//! ```
//!
//! Hooks are fixed once the proxy is shared; see [`Proxy::hooks_mut`].

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};
use crate::node::Node;
use crate::proxy::Proxy;
use crate::types::{DirEntry, FileType};

/// Enumerate a directory.
pub type ListHook =
    Arc<dyn Fn(Arc<Proxy>, PathBuf) -> BoxFuture<'static, FsResult<Vec<DirEntry>>> + Send + Sync>;

/// Resolve a joined child path into a node.
pub type LookupHook = Arc<
    dyn Fn(Arc<Proxy>, PathBuf, CancellationToken) -> BoxFuture<'static, FsResult<Node>>
        + Send
        + Sync,
>;

/// Read a file's full contents.
pub type ReadAllHook =
    Arc<dyn Fn(Arc<Proxy>, PathBuf) -> BoxFuture<'static, FsResult<Vec<u8>>> + Send + Sync>;

/// The hook set installed on a proxy.
#[derive(Clone)]
pub struct Hooks {
    pub list: ListHook,
    pub lookup: LookupHook,
    pub read_all: ReadAllHook,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            list: list_hook(default_list),
            lookup: lookup_hook(default_lookup),
            read_all: read_all_hook(default_read_all),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

/// Box an async function as a [`ListHook`].
pub fn list_hook<F, Fut>(f: F) -> ListHook
where
    F: Fn(Arc<Proxy>, PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FsResult<Vec<DirEntry>>> + Send + 'static,
{
    Arc::new(move |proxy, path| f(proxy, path).boxed())
}

/// Box an async function as a [`LookupHook`].
pub fn lookup_hook<F, Fut>(f: F) -> LookupHook
where
    F: Fn(Arc<Proxy>, PathBuf, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FsResult<Node>> + Send + 'static,
{
    Arc::new(move |proxy, path, cancel| f(proxy, path, cancel).boxed())
}

/// Box an async function as a [`ReadAllHook`].
pub fn read_all_hook<F, Fut>(f: F) -> ReadAllHook
where
    F: Fn(Arc<Proxy>, PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FsResult<Vec<u8>>> + Send + 'static,
{
    Arc::new(move |proxy, path| f(proxy, path).boxed())
}

/// List a real directory.
///
/// Entries come back in the order the filesystem yields them. Each child is
/// stat'ed (following symlinks) to tell directories from everything else;
/// a failed stat fails the whole listing rather than dropping the entry.
pub async fn default_list(proxy: Arc<Proxy>, path: PathBuf) -> FsResult<Vec<DirEntry>> {
    let mut dir = fs::read_dir(&path)
        .await
        .map_err(|e| FsError::from_io(e, &path))?;

    let mut entries = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| FsError::from_io(e, &path))?
    {
        let child = entry.path();
        let meta = fs::metadata(&child)
            .await
            .map_err(|e| FsError::from_io(e, &child))?;
        let kind = if meta.is_dir() {
            FileType::Directory
        } else {
            FileType::File
        };

        entries.push(DirEntry {
            ino: proxy.identifier_for(&child),
            name: entry.file_name().to_string_lossy().into_owned(),
            kind,
        });
    }

    Ok(entries)
}

/// Stat a path and build the matching node.
///
/// The cancellation token is accepted for contract compatibility; a single
/// stat is not worth interrupting.
pub async fn default_lookup(
    proxy: Arc<Proxy>,
    path: PathBuf,
    _cancel: CancellationToken,
) -> FsResult<Node> {
    tracing::debug!(path = %path.display(), "default lookup");
    let meta = fs::metadata(&path)
        .await
        .map_err(|e| FsError::from_io(e, &path))?;
    Ok(proxy.node_from_metadata(path, &meta))
}

/// Read a real file in one go.
pub async fn default_read_all(_proxy: Arc<Proxy>, path: PathBuf) -> FsResult<Vec<u8>> {
    fs::read(&path).await.map_err(|e| FsError::from_io(e, &path))
}

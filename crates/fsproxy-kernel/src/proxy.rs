//! The proxy controller.
//!
//! A [`Proxy`] pairs a mountpoint with a source tree, owns the inode
//! registry and the hook set, and drives the one-shot mount lifecycle.
//!
//! Hooks can only be replaced while the proxy is uniquely owned. Once
//! [`Proxy::shared`] wraps it in an `Arc` the hook set is frozen, so requests
//! read it without any locking.

use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

use crate::error::{FsResult, ProxyError};
use crate::hooks::{list_hook, lookup_hook, read_all_hook, Hooks};
use crate::mount::{FuseMounter, Mounter};
use crate::node::{Directory, File, Node};
use crate::registry::InodeRegistry;
use crate::types::{DirEntry, NodeAttr};

/// Lifecycle of a proxy's single mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Unmounted,
    Mounted,
    Serving,
    Terminated,
}

/// Hookable passthrough view of a source directory.
pub struct Proxy {
    mountpoint: PathBuf,
    source: PathBuf,
    hooks: Hooks,
    registry: InodeRegistry,
    started: AtomicBool,
    state: Mutex<ProxyState>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("mountpoint", &self.mountpoint)
            .field("source", &self.source)
            .field("state", &self.state())
            .finish()
    }
}

impl Proxy {
    /// Create a proxy with the default passthrough hooks.
    pub fn new(mountpoint: impl Into<PathBuf>, source: impl Into<PathBuf>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            source: source.into(),
            hooks: Hooks::default(),
            registry: InodeRegistry::new(),
            started: AtomicBool::new(false),
            state: Mutex::new(ProxyState::Unmounted),
        }
    }

    /// Replace the List hook.
    pub fn with_list<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Proxy>, PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FsResult<Vec<DirEntry>>> + Send + 'static,
    {
        self.hooks.list = list_hook(f);
        self
    }

    /// Replace the Lookup hook.
    pub fn with_lookup<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Proxy>, PathBuf, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FsResult<Node>> + Send + 'static,
    {
        self.hooks.lookup = lookup_hook(f);
        self
    }

    /// Replace the ReadAll hook.
    pub fn with_read_all<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Proxy>, PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FsResult<Vec<u8>>> + Send + 'static,
    {
        self.hooks.read_all = read_all_hook(f);
        self
    }

    /// Mutable access to the hook set, only while unshared.
    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// The installed hook set.
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Freeze the configuration and share the proxy.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Where the view is mounted.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// The real directory being proxied.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Identifier registry shared by every node of this proxy.
    pub fn registry(&self) -> &InodeRegistry {
        &self.registry
    }

    /// Stable identifier for a source path.
    pub fn identifier_for(&self, path: &Path) -> u64 {
        self.registry.identifier_for(path)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProxyState {
        *self.state.lock()
    }

    fn set_state(&self, state: ProxyState) {
        *self.state.lock() = state;
        tracing::info!(mountpoint = %self.mountpoint.display(), ?state, "proxy state changed");
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// The directory node for the source root.
    pub fn root(self: &Arc<Self>) -> Node {
        Node::Directory(Arc::new(self.directory(self.source.clone())))
    }

    /// Build a directory node for `path`.
    pub fn directory(self: &Arc<Self>, path: impl Into<PathBuf>) -> Directory {
        let path = path.into();
        let attr = NodeAttr::directory(self.identifier_for(&path));
        Directory::new(Arc::clone(self), path, attr)
    }

    /// Build a file node for `path` with a known size.
    pub fn file(self: &Arc<Self>, path: impl Into<PathBuf>, size: u64) -> File {
        let path = path.into();
        let attr = NodeAttr::file(self.identifier_for(&path), size);
        File::new(Arc::clone(self), path, attr)
    }

    /// Build whichever node `meta` describes.
    pub fn node_from_metadata(self: &Arc<Self>, path: PathBuf, meta: &std::fs::Metadata) -> Node {
        let ino = self.identifier_for(&path);
        if meta.is_dir() {
            let attr = NodeAttr::directory(ino).with_metadata(meta);
            Node::Directory(Arc::new(Directory::new(Arc::clone(self), path, attr)))
        } else {
            let attr = NodeAttr::file(ino, meta.len()).with_metadata(meta);
            Node::File(Arc::new(File::new(Arc::clone(self), path, attr)))
        }
    }

    // ========================================================================
    // Hook dispatch
    // ========================================================================

    /// Run the installed List hook.
    pub async fn list(self: &Arc<Self>, path: PathBuf) -> FsResult<Vec<DirEntry>> {
        (self.hooks.list)(Arc::clone(self), path).await
    }

    /// Run the installed Lookup hook.
    pub async fn lookup(self: &Arc<Self>, path: PathBuf, cancel: CancellationToken) -> FsResult<Node> {
        (self.hooks.lookup)(Arc::clone(self), path, cancel).await
    }

    /// Run the installed ReadAll hook.
    pub async fn read_all(self: &Arc<Self>, path: PathBuf) -> FsResult<Vec<u8>> {
        (self.hooks.read_all)(Arc::clone(self), path).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Mount through FUSE and serve until unmounted.
    pub async fn serve(self: &Arc<Self>) -> Result<(), ProxyError> {
        self.serve_with(&FuseMounter::default()).await
    }

    /// Mount through `mounter` and serve until unmounted.
    ///
    /// A stale mount at the target is unmounted first on a best-effort basis.
    /// This can only be called once per proxy.
    pub async fn serve_with<M: Mounter + ?Sized>(self: &Arc<Self>, mounter: &M) -> Result<(), ProxyError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProxyError::AlreadyServed);
        }

        if let Err(e) = mounter.unmount(&self.mountpoint).await {
            tracing::warn!(
                mountpoint = %self.mountpoint.display(),
                error = %e,
                "could not unmount stale mount, continuing"
            );
        }

        let session = match mounter.mount(Arc::clone(self)).await {
            Ok(session) => session,
            Err(e) => {
                self.set_state(ProxyState::Terminated);
                return Err(e);
            }
        };
        self.set_state(ProxyState::Mounted);

        self.set_state(ProxyState::Serving);
        let result = session.wait().await;
        self.set_state(ProxyState::Terminated);

        match &result {
            Ok(()) => tracing::info!(mountpoint = %self.mountpoint.display(), "unmounted"),
            Err(e) => tracing::error!(mountpoint = %self.mountpoint.display(), error = %e, "serve loop ended"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::default_read_all;
    use crate::mount::ServeHandle;
    use crate::node::{DirectoryNode, FileNode};
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Mounter whose unmount always fails and whose serve loop ends at once.
    #[derive(Default)]
    struct StaleMounter {
        unmounts: AtomicUsize,
        mounts: AtomicUsize,
        fail_mount: bool,
    }

    #[async_trait]
    impl Mounter for StaleMounter {
        async fn unmount(&self, _mountpoint: &Path) -> io::Result<()> {
            self.unmounts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::other("not mounted"))
        }

        async fn mount(&self, proxy: Arc<Proxy>) -> Result<ServeHandle, ProxyError> {
            self.mounts.fetch_add(1, Ordering::SeqCst);
            if self.fail_mount {
                return Err(ProxyError::Mount {
                    path: proxy.mountpoint().display().to_string(),
                    source: io::Error::from(io::ErrorKind::PermissionDenied),
                });
            }
            Ok(ServeHandle::new(tokio::spawn(async { Ok::<(), io::Error>(()) })))
        }
    }

    #[tokio::test]
    async fn test_stale_unmount_failure_is_not_fatal() {
        let proxy = Proxy::new("/mnt/view", "/srv/data").shared();
        let mounter = StaleMounter::default();

        proxy.serve_with(&mounter).await.unwrap();

        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 1);
        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.state(), ProxyState::Terminated);
    }

    #[tokio::test]
    async fn test_mount_failure_propagates() {
        let proxy = Proxy::new("/mnt/view", "/srv/data").shared();
        let mounter = StaleMounter {
            fail_mount: true,
            ..Default::default()
        };

        let result = proxy.serve_with(&mounter).await;
        assert!(matches!(result, Err(ProxyError::Mount { .. })));
        assert_eq!(proxy.state(), ProxyState::Terminated);
    }

    #[tokio::test]
    async fn test_serve_is_one_shot() {
        let proxy = Proxy::new("/mnt/view", "/srv/data").shared();
        let mounter = StaleMounter::default();

        proxy.serve_with(&mounter).await.unwrap();
        let again = proxy.serve_with(&mounter).await;
        assert!(matches!(again, Err(ProxyError::AlreadyServed)));
        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_serve_loop_error_is_returned() {
        struct BrokenLoop;

        #[async_trait]
        impl Mounter for BrokenLoop {
            async fn unmount(&self, _mountpoint: &Path) -> io::Result<()> {
                Ok(())
            }

            async fn mount(&self, _proxy: Arc<Proxy>) -> Result<ServeHandle, ProxyError> {
                Ok(ServeHandle::new(tokio::spawn(async {
                    Err::<(), _>(io::Error::from(io::ErrorKind::BrokenPipe))
                })))
            }
        }

        let proxy = Proxy::new("/mnt/view", "/srv/data").shared();
        let result = proxy.serve_with(&BrokenLoop).await;
        assert!(matches!(result, Err(ProxyError::Serve(_))));
    }

    #[test]
    fn test_new_proxy_is_unmounted() {
        let proxy = Proxy::new("/mnt/view", "/srv/data");
        assert_eq!(proxy.state(), ProxyState::Unmounted);
        assert_eq!(proxy.mountpoint(), Path::new("/mnt/view"));
        assert_eq!(proxy.source(), Path::new("/srv/data"));
        assert!(proxy.registry().is_empty());
    }

    #[test]
    fn test_root_is_source_directory() {
        let proxy = Proxy::new("/mnt/view", "/srv/data").shared();

        let root = proxy.root();
        assert!(root.is_dir());
        assert_eq!(root.path(), Path::new("/srv/data"));
        assert_eq!(Some(root.attributes().ino), proxy.registry().get(Path::new("/srv/data")));

        // Fresh node, same identifier
        assert_eq!(proxy.root().attributes().ino, root.attributes().ino);
    }

    #[tokio::test]
    async fn test_file_helper_reads_through_hooks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let proxy = Proxy::new("/mnt/view", dir.path()).shared();

        let file = proxy.file(dir.path().join("a.txt"), 5);
        assert_eq!(file.attributes().size, 5);
        assert_eq!(file.attributes().perm, 0o444);
        assert_eq!(
            Some(file.attributes().ino),
            proxy.registry().get(&dir.path().join("a.txt"))
        );
        assert_eq!(file.read_all(&CancellationToken::new()).await.unwrap(), b"hello");

        let sub = proxy.directory(dir.path());
        assert_eq!(sub.attributes().ino, proxy.root().attributes().ino);
    }

    #[tokio::test]
    async fn test_hooks_mut_replaces_read_all() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let mut proxy = Proxy::new("/mnt/view", dir.path());
        proxy.hooks_mut().read_all = read_all_hook(|proxy, path| async move {
            let mut bytes = default_read_all(proxy, path).await?;
            bytes.reverse();
            Ok(bytes)
        });
        let proxy = proxy.shared();

        let data = proxy.read_all(dir.path().join("a.txt")).await.unwrap();
        assert_eq!(data, b"olleh");
    }
}

//! `fuser` adapter over the node protocol.
//!
//! The kernel addresses nodes by inode. The adapter keeps the nodes it has
//! handed out in an [`InodeTable`] (the root under FUSE's inode 1), counting
//! lookups so a node stays resolvable until the kernel has forgotten every
//! reference to it. Anything that reaches a hook is spawned onto the tokio
//! runtime and replied to from that task, so a slow read never holds up
//! unrelated requests.
//!
//! Files are read whole on `open` and served from memory with direct I/O,
//! which lets hooks change a file's length freely.

use dashmap::DashMap;
use fuser::{
    Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use std::ffi::OsStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};
use crate::node::Node;
use crate::proxy::Proxy;
use crate::types::{DirEntry, FileType, NodeAttr};

/// Inode the kernel uses for the mount root.
pub const ROOT_INODE: u64 = 1;

const TTL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct InodeEntry {
    node: Node,
    parent: u64,
    lookups: u64,
}

/// Nodes the kernel currently holds, keyed by inode.
#[derive(Debug)]
pub struct InodeTable {
    entries: DashMap<u64, InodeEntry>,
}

impl InodeTable {
    /// A table holding only the root, which is never forgotten.
    pub fn new(root: Node) -> Self {
        let entries = DashMap::new();
        entries.insert(
            ROOT_INODE,
            InodeEntry {
                node: root,
                parent: ROOT_INODE,
                lookups: 0,
            },
        );
        Self { entries }
    }

    /// Record one successful lookup of `node` under `parent`.
    pub fn remember(&self, parent: u64, node: Node) -> u64 {
        let ino = node.attributes().ino;
        self.entries
            .entry(ino)
            .and_modify(|entry| {
                entry.node = node.clone();
                entry.parent = parent;
                entry.lookups += 1;
            })
            .or_insert_with(|| InodeEntry {
                node,
                parent,
                lookups: 1,
            });
        ino
    }

    /// Drop `nlookup` references; returns true once the node is gone.
    pub fn forget(&self, ino: u64, nlookup: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }
        self.entries
            .remove_if_mut(&ino, |_, entry| {
                entry.lookups = entry.lookups.saturating_sub(nlookup);
                entry.lookups == 0
            })
            .is_some()
    }

    /// Node bound to `ino`.
    pub fn get(&self, ino: u64) -> Option<Node> {
        self.entries.get(&ino).map(|entry| entry.node.clone())
    }

    /// Inode of the directory `ino` was looked up in.
    pub fn parent(&self, ino: u64) -> Option<u64> {
        self.entries.get(&ino).map(|entry| entry.parent)
    }

    /// Outstanding kernel references to `ino`.
    pub fn lookups(&self, ino: u64) -> Option<u64> {
        self.entries.get(&ino).map(|entry| entry.lookups)
    }
}

/// State shared between the session thread and request tasks.
#[derive(Debug)]
pub struct FsState {
    nodes: InodeTable,
    open_files: DashMap<u64, Arc<Vec<u8>>>,
    open_dirs: DashMap<u64, Arc<Vec<DirEntry>>>,
    next_handle: AtomicU64,
}

impl FsState {
    /// Fresh state with only the proxy root registered.
    pub fn new(proxy: &Arc<Proxy>) -> Self {
        Self {
            nodes: InodeTable::new(proxy.root()),
            open_files: DashMap::new(),
            open_dirs: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Nodes the kernel currently holds.
    pub fn nodes(&self) -> &InodeTable {
        &self.nodes
    }

    fn allocate_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn node(&self, ino: u64) -> FsResult<Node> {
        self.nodes
            .get(ino)
            .ok_or_else(|| FsError::not_found(format!("inode {}", ino)))
    }

    /// Resolve `name` in directory `parent` and register the child.
    pub async fn lookup(&self, parent: u64, name: &str, cancel: &CancellationToken) -> FsResult<Node> {
        let dir = match self.node(parent)? {
            Node::Directory(dir) => dir,
            Node::File(file) => {
                return Err(FsError::not_a_directory(file.path().display().to_string()));
            }
        };
        let child = dir.resolve_child(name, cancel).await?;
        self.nodes.remember(parent, child.clone());
        Ok(child)
    }

    /// List directory `ino` and keep the entries under a new handle.
    pub async fn open_dir(&self, ino: u64, cancel: &CancellationToken) -> FsResult<u64> {
        let dir = match self.node(ino)? {
            Node::Directory(dir) => dir,
            Node::File(file) => {
                return Err(FsError::not_a_directory(file.path().display().to_string()));
            }
        };
        let entries = dir.list_entries(cancel).await?;
        let fh = self.allocate_handle();
        self.open_dirs.insert(fh, Arc::new(entries));
        Ok(fh)
    }

    /// Entries of an open directory past `offset`, each with its resume offset.
    pub fn read_dir(
        &self,
        ino: u64,
        fh: u64,
        offset: i64,
    ) -> FsResult<Vec<(u64, i64, fuser::FileType, String)>> {
        let skip = usize::try_from(offset).map_err(|_| FsError::InvalidOffset(offset))?;
        let entries = self
            .open_dirs
            .get(&fh)
            .map(|e| Arc::clone(e.value()))
            .ok_or(FsError::BadHandle(fh))?;
        let parent = self.nodes.parent(ino).unwrap_or(ROOT_INODE);

        Ok(directory_listing(ino, parent, &entries)
            .into_iter()
            .enumerate()
            .skip(skip)
            .map(|(idx, (child, kind, name))| (child, (idx + 1) as i64, kind, name))
            .collect())
    }

    /// Drop a directory handle.
    pub fn release_dir(&self, fh: u64) {
        self.open_dirs.remove(&fh);
    }

    /// Read file `ino` in full and keep it under a new handle.
    pub async fn open_file(&self, ino: u64, flags: i32, cancel: &CancellationToken) -> FsResult<u64> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(FsError::ReadOnly);
        }
        let file = match self.node(ino)? {
            Node::File(file) => file,
            Node::Directory(dir) => {
                return Err(FsError::is_a_directory(dir.path().display().to_string()));
            }
        };
        let data = file.read_all(cancel).await?;
        let fh = self.allocate_handle();
        self.open_files.insert(fh, Arc::new(data));
        Ok(fh)
    }

    /// Bytes of an open file for a read at `offset`.
    pub fn read(&self, fh: u64, offset: i64, size: u32) -> FsResult<Vec<u8>> {
        let offset = u64::try_from(offset).map_err(|_| FsError::InvalidOffset(offset))?;
        let data = self.open_files.get(&fh).ok_or(FsError::BadHandle(fh))?;
        Ok(read_window(data.value(), offset, size).to_vec())
    }

    /// Drop a file handle and its buffered content.
    pub fn release_file(&self, fh: u64) {
        self.open_files.remove(&fh);
    }
}

/// A `fuser::Filesystem` serving one [`Proxy`].
pub struct ProxyFs {
    proxy: Arc<Proxy>,
    runtime: Handle,
    state: Arc<FsState>,
    shutdown: CancellationToken,
}

impl ProxyFs {
    /// Bind the proxy root to [`ROOT_INODE`]; requests run on `runtime`.
    pub fn new(proxy: Arc<Proxy>, runtime: Handle) -> Self {
        let state = Arc::new(FsState::new(&proxy));
        Self {
            proxy,
            runtime,
            state,
            shutdown: CancellationToken::new(),
        }
    }

    /// Handles and nodes shared with request tasks.
    pub fn state(&self) -> &Arc<FsState> {
        &self.state
    }

    /// Cancelled when the filesystem is destroyed.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

/// Convert node attributes into what the kernel expects.
///
/// `ino` is the inode the kernel knows the node by, which differs from the
/// registry identifier only for the root.
pub fn fuse_attr(ino: u64, attr: &NodeAttr, uid: u32, gid: u32) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind: fuse_kind(attr.kind),
        perm: attr.perm as u16,
        nlink: if attr.is_dir() { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

fn fuse_kind(kind: FileType) -> fuser::FileType {
    match kind {
        FileType::Directory => fuser::FileType::Directory,
        FileType::File => fuser::FileType::RegularFile,
    }
}

/// Directory listing as handed to the kernel, `.` and `..` first.
pub fn directory_listing(
    ino: u64,
    parent: u64,
    entries: &[DirEntry],
) -> Vec<(u64, fuser::FileType, String)> {
    let mut listing = Vec::with_capacity(entries.len().saturating_add(2));
    listing.push((ino, fuser::FileType::Directory, ".".to_owned()));
    listing.push((parent, fuser::FileType::Directory, "..".to_owned()));
    for entry in entries {
        listing.push((entry.ino, fuse_kind(entry.kind), entry.name.clone()));
    }
    listing
}

/// The part of `data` a read at `offset` for `size` bytes should return.
pub fn read_window(data: &[u8], offset: u64, size: u32) -> &[u8] {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
    let end = start.saturating_add(size as usize).min(data.len());
    &data[start..end]
}

impl Filesystem for ProxyFs {
    fn destroy(&mut self) {
        self.shutdown.cancel();
        tracing::info!(mountpoint = %self.proxy.mountpoint().display(), "filesystem destroyed");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str().map(str::to_owned) else {
            reply.error(libc::ENOENT);
            return;
        };

        let (uid, gid) = (req.uid(), req.gid());
        let state = Arc::clone(&self.state);
        let cancel = self.request_token();
        self.runtime.spawn(async move {
            match state.lookup(parent, &name, &cancel).await {
                Ok(child) => {
                    let attr = fuse_attr(child.attributes().ino, child.attributes(), uid, gid);
                    reply.entry(&TTL, &attr, 0);
                }
                Err(e) => {
                    tracing::debug!(parent, %name, error = %e, "lookup failed");
                    reply.error(e.errno());
                }
            }
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.state.nodes().forget(ino, nlookup);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.state.nodes().get(ino) {
            Some(node) => reply.attr(&TTL, &fuse_attr(ino, node.attributes(), req.uid(), req.gid())),
            None => reply.error(libc::ENOENT),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let state = Arc::clone(&self.state);
        let cancel = self.request_token();
        self.runtime.spawn(async move {
            match state.open_dir(ino, &cancel).await {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => {
                    tracing::debug!(ino, error = %e, "list failed");
                    reply.error(e.errno());
                }
            }
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        match self.state.read_dir(ino, fh, offset) {
            Ok(page) => {
                for (child, next, kind, name) in page {
                    if reply.add(child, next, kind, name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.state.release_dir(fh);
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let state = Arc::clone(&self.state);
        let cancel = self.request_token();
        self.runtime.spawn(async move {
            match state.open_file(ino, flags, &cancel).await {
                Ok(fh) => reply.opened(fh, fuser::consts::FOPEN_DIRECT_IO),
                Err(e) => {
                    tracing::debug!(ino, error = %e, "open failed");
                    reply.error(e.errno());
                }
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.state.read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.state.release_file(fh);
        reply.ok();
    }
}

//! # fsproxy-kernel
//!
//! Hookable passthrough filesystem proxy.
//!
//! A [`Proxy`] mounts a read-only view of a source directory. Every
//! directory listing, child lookup and file read goes through a replaceable
//! hook; the defaults pass straight through to the source tree. Hosts change
//! the view either by swapping a hook or by wrapping the nodes a lookup
//! returns.
//!
//! Layout:
//! - [`registry`]: stable path → inode identifiers
//! - [`node`]: directory and file nodes the FUSE adapter serves
//! - [`hooks`]: the List / Lookup / ReadAll contract and its defaults
//! - [`proxy`]: the controller and its one-shot mount lifecycle
//! - [`mount`] and [`fuse`]: attaching to the kernel through `fuser`

pub mod error;
pub mod fuse;
pub mod hooks;
pub mod mount;
pub mod node;
pub mod proxy;
pub mod registry;
pub mod types;

pub use error::{FsError, FsResult, ProxyError};
pub use fuse::{FsState, InodeTable, ProxyFs, ROOT_INODE};
pub use hooks::{
    default_list, default_lookup, default_read_all, list_hook, lookup_hook, read_all_hook, Hooks,
    ListHook, LookupHook, ReadAllHook,
};
pub use mount::{FuseMounter, MountOptions, Mounter, ServeHandle};
pub use node::{until_cancelled, Directory, DirectoryNode, File, FileNode, Node};
pub use proxy::{Proxy, ProxyState};
pub use registry::{InodeRegistry, RESERVED_INODES};
pub use types::{DirEntry, FileType, NodeAttr, DIRECTORY_PERM, FILE_PERM};

/// Re-exported so hosts can name the cancellation type hooks receive.
pub use tokio_util::sync::CancellationToken;

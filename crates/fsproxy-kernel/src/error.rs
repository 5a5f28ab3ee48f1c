//! Proxy error types.
//!
//! [`FsError`] covers per-request failures surfaced to the FUSE caller.
//! [`ProxyError`] covers the mount lifecycle.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Per-request filesystem error.
#[derive(Debug, Error)]
pub enum FsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The proxied view is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Invalid path or child name.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No open file or directory under this handle.
    #[error("bad handle: {0}")]
    BadHandle(u64),

    /// Negative read or readdir offset.
    #[error("invalid offset: {0}")]
    InvalidOffset(i64),

    /// The request was cancelled before it completed.
    #[error("interrupted")]
    Interrupted,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Classify an I/O error raised while touching `path`.
    ///
    /// Not-found, permission and not-a-directory failures get their own
    /// variants; everything else is kept as the raw I/O error so its errno
    /// survives to the FUSE reply.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        let shown = path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(shown),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(shown),
            io::ErrorKind::NotADirectory => Self::NotADirectory(shown),
            io::ErrorKind::IsADirectory => Self::IsADirectory(shown),
            _ => Self::Io(err),
        }
    }

    /// The errno reported to the kernel for this error.
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::PermissionDenied(_) => libc::EACCES,
            FsError::ReadOnly => libc::EROFS,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::InvalidOffset(_) => libc::EINVAL,
            FsError::Interrupted => libc::EINTR,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Per-request result type.
pub type FsResult<T> = Result<T, FsError>;

/// Mount lifecycle error.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The mount handshake failed.
    #[error("failed to mount {path}: {source}")]
    Mount {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The serve loop ended with an unrecoverable protocol error.
    #[error("serve loop failed: {0}")]
    Serve(#[source] io::Error),

    /// `serve` was already called on this proxy.
    #[error("proxy has already been served")]
    AlreadyServed,

    /// The serve task panicked or was aborted.
    #[error("serve task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_keeps_kind() {
        let path = Path::new("/src/missing");
        let err = FsError::from_io(io::Error::from(io::ErrorKind::NotFound), path);
        assert!(matches!(err, FsError::NotFound(ref p) if p == "/src/missing"));

        let err = FsError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), path);
        assert!(matches!(err, FsError::PermissionDenied(_)));

        let err = FsError::from_io(io::Error::from_raw_os_error(libc::EIO), path);
        assert!(matches!(err, FsError::Io(_)));
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::not_found("x").errno(), libc::ENOENT);
        assert_eq!(FsError::permission_denied("x").errno(), libc::EACCES);
        assert_eq!(FsError::not_a_directory("x").errno(), libc::ENOTDIR);
        assert_eq!(FsError::is_a_directory("x").errno(), libc::EISDIR);
        assert_eq!(FsError::BadHandle(3).errno(), libc::EBADF);
        assert_eq!(FsError::InvalidOffset(-1).errno(), libc::EINVAL);
        assert_eq!(FsError::ReadOnly.errno(), libc::EROFS);
        assert_eq!(FsError::Interrupted.errno(), libc::EINTR);
        assert_eq!(
            FsError::Io(io::Error::from_raw_os_error(libc::ELOOP)).errno(),
            libc::ELOOP
        );
        assert_eq!(FsError::Io(io::Error::other("boom")).errno(), libc::EIO);
    }
}

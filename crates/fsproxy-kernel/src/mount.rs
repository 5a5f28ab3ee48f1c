//! Mount lifecycle against the FUSE runtime.
//!
//! [`Mounter`] is the seam between the proxy controller and whatever
//! actually attaches the filesystem. [`FuseMounter`] is the real one; tests
//! substitute their own.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ProxyError;
use crate::fuse::ProxyFs;
use crate::proxy::Proxy;

/// Helpers tried, in order, to clear a stale mount.
#[cfg(target_os = "macos")]
const UNMOUNT_COMMANDS: &[(&str, &[&str])] = &[("umount", &[])];
#[cfg(not(target_os = "macos"))]
const UNMOUNT_COMMANDS: &[(&str, &[&str])] = &[("fusermount3", &["-u"]), ("fusermount", &["-u"])];

/// Attaches a proxy to the kernel.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Best-effort removal of whatever is mounted at `mountpoint`.
    async fn unmount(&self, mountpoint: &Path) -> io::Result<()>;

    /// Complete the mount handshake and start serving.
    ///
    /// Returns once the filesystem is attached; the returned handle resolves
    /// when the serve loop ends.
    async fn mount(&self, proxy: Arc<Proxy>) -> Result<ServeHandle, ProxyError>;
}

/// A running serve loop.
#[derive(Debug)]
pub struct ServeHandle {
    task: JoinHandle<io::Result<()>>,
}

impl ServeHandle {
    /// Wrap the task running the session loop.
    pub fn new(task: JoinHandle<io::Result<()>>) -> Self {
        Self { task }
    }

    /// Block until the filesystem is unmounted or the loop fails.
    pub async fn wait(self) -> Result<(), ProxyError> {
        self.task.await?.map_err(ProxyError::Serve)
    }
}

/// Runtime mount flags. The view is always mounted read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Name shown in the mount table.
    pub fs_name: String,
    /// Let users other than the mounter see the view.
    pub allow_other: bool,
    /// Ask the kernel to unmount when the process exits.
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            fs_name: "fsproxy".to_string(),
            allow_other: false,
            auto_unmount: false,
        }
    }
}

impl MountOptions {
    /// Translate into fuser's option list.
    pub fn to_fuser(&self) -> Vec<fuser::MountOption> {
        let mut options = vec![
            fuser::MountOption::FSName(self.fs_name.clone()),
            fuser::MountOption::RO,
        ];
        if self.allow_other {
            options.push(fuser::MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(fuser::MountOption::AutoUnmount);
        }
        options
    }
}

/// Mounts through the `fuser` session loop.
#[derive(Debug, Clone, Default)]
pub struct FuseMounter {
    options: MountOptions,
}

impl FuseMounter {
    /// Mounter using `options` for every mount.
    pub fn new(options: MountOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Mounter for FuseMounter {
    async fn unmount(&self, mountpoint: &Path) -> io::Result<()> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no unmount helper found");

        for (program, args) in UNMOUNT_COMMANDS {
            match Command::new(program).args(*args).arg(mountpoint).output().await {
                Ok(output) if output.status.success() => {
                    tracing::info!(mountpoint = %mountpoint.display(), "unmounted stale mount");
                    return Ok(());
                }
                Ok(output) => {
                    return Err(io::Error::other(format!(
                        "{} exited with {}: {}",
                        program,
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                // Helper not installed, try the next one
                Err(e) if e.kind() == io::ErrorKind::NotFound => last_err = e,
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    async fn mount(&self, proxy: Arc<Proxy>) -> Result<ServeHandle, ProxyError> {
        let mountpoint = proxy.mountpoint().to_path_buf();
        let shown = mountpoint.display().to_string();
        let options = self.options.to_fuser();
        let filesystem = ProxyFs::new(proxy, tokio::runtime::Handle::current());

        // Mounting and the session loop both block, so they share one
        // blocking thread; the handshake result is reported back early.
        let (mounted_tx, mounted_rx) = oneshot::channel();
        let task = tokio::task::spawn_blocking(move || {
            let mut session = match fuser::Session::new(filesystem, &mountpoint, &options) {
                Ok(session) => {
                    let _ = mounted_tx.send(Ok(()));
                    session
                }
                Err(e) => {
                    let _ = mounted_tx.send(Err(e));
                    return Ok(());
                }
            };
            session.run()
        });

        match mounted_rx.await {
            Ok(Ok(())) => {
                tracing::info!(mountpoint = %shown, "mounted");
                Ok(ServeHandle::new(task))
            }
            Ok(Err(source)) => Err(ProxyError::Mount { path: shown, source }),
            Err(_) => {
                // Sender dropped without reporting: the blocking task died.
                task.await?;
                Err(ProxyError::Mount {
                    path: shown,
                    source: io::Error::other("mount task exited before the handshake finished"),
                })
            }
        }
    }
}

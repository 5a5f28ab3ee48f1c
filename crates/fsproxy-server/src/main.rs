//! fsproxy binary
//!
//! Mounts a read-only, optionally transformed view of a directory tree.
//!
//! ## Usage
//!
//! ```bash
//! # Plain passthrough
//! fsproxy ~/mnt/view ~/notes
//!
//! # Upper-cased view without dotfiles
//! fsproxy ~/mnt/loud ~/notes --transform uppercase --hide-dotfiles
//!
//! # Everything from a config file, mountpoint overridden
//! fsproxy --config ~/.config/fsproxy/notes.ron ~/mnt/other
//! ```
//!
//! Unmount with `fusermount -u <mountpoint>` to stop serving.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use fsproxy_kernel::{FuseMounter, Proxy};
use fsproxy_server::{transform, ProxyConfig, Transform};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Mount a transformed read-only view of a directory.
#[derive(Parser, Debug)]
#[command(name = "fsproxy")]
#[command(about = "Mount a transformed read-only view of a directory")]
struct Args {
    /// Where to mount the view
    mountpoint: Option<PathBuf>,

    /// Directory to proxy
    source: Option<PathBuf>,

    /// RON config file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Content transform applied to every file
    #[arg(short, long, value_enum)]
    transform: Option<Transform>,

    /// Hide entries whose names start with a dot
    #[arg(long)]
    hide_dotfiles: bool,

    /// Let other users see the mount (needs user_allow_other in fuse.conf)
    #[arg(long)]
    allow_other: bool,

    /// Unmount automatically when the process exits
    #[arg(long)]
    auto_unmount: bool,

    /// Filesystem name shown in the mount table
    #[arg(long)]
    fs_name: Option<String>,
}

impl Args {
    /// Layer command-line values over the config file.
    fn into_config(self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if self.mountpoint.is_some() {
            config.mountpoint = self.mountpoint;
        }
        if self.source.is_some() {
            config.source = self.source;
        }
        if let Some(transform) = self.transform {
            config.transform = transform;
        }
        if let Some(fs_name) = self.fs_name {
            config.mount.fs_name = fs_name;
        }
        config.hide_dotfiles |= self.hide_dotfiles;
        config.mount.allow_other |= self.allow_other;
        config.mount.auto_unmount |= self.auto_unmount;

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.into_config()?;
    let mountpoint = config.mountpoint()?;
    let source = config.source()?;

    check_source(&source).await?;

    tracing::info!(
        mountpoint = %mountpoint.display(),
        source = %source.display(),
        transform = ?config.transform,
        hide_dotfiles = config.hide_dotfiles,
        "starting proxy"
    );

    let proxy = transform::install(
        Proxy::new(mountpoint, source),
        config.transform,
        config.hide_dotfiles,
    )
    .shared();

    let mounter = FuseMounter::new(config.mount_options());
    proxy.serve_with(&mounter).await?;

    Ok(())
}

/// The source must be a directory we can list.
async fn check_source(source: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(source)
        .await
        .with_context(|| format!("source {} is not accessible", source.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("source {} is not a directory", source.display());
    }
    tokio::fs::read_dir(source)
        .await
        .with_context(|| format!("source {} is not readable", source.display()))?;
    Ok(())
}

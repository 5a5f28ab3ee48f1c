//! Proxy configuration file.
//!
//! Configs are RON:
//!
//! ```ron
//! (
//!     mountpoint: Some("~/mnt/loud"),
//!     source: Some("~/notes"),
//!     transform: Uppercase,
//!     hide_dotfiles: true,
//!     mount: (fs_name: "loud-notes", allow_other: false),
//! )
//! ```
//!
//! Every field is optional; command-line flags fill in or override whatever
//! the file leaves out.

use std::path::{Path, PathBuf};

use fsproxy_kernel::MountOptions;
use serde::{Deserialize, Serialize};

use crate::transform::Transform;

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("no {0} given on the command line or in the config file")]
    Missing(&'static str),
}

/// Everything needed to run one proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub mountpoint: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub transform: Transform,
    pub hide_dotfiles: bool,
    pub mount: MountConfig,
}

/// Mount flags as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub fs_name: String,
    pub allow_other: bool,
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        let defaults = MountOptions::default();
        Self {
            fs_name: defaults.fs_name,
            allow_other: defaults.allow_other,
            auto_unmount: defaults.auto_unmount,
        }
    }
}

impl From<&MountConfig> for MountOptions {
    fn from(config: &MountConfig) -> Self {
        MountOptions {
            fs_name: config.fs_name.clone(),
            allow_other: config.allow_other,
            auto_unmount: config.auto_unmount,
        }
    }
}

impl ProxyConfig {
    /// Parse a config from RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Read and parse a config file. `~` in the path is expanded.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = expand(path);
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron(&text)
    }

    /// Mountpoint with `~` expanded.
    pub fn mountpoint(&self) -> Result<PathBuf, ConfigError> {
        self.mountpoint
            .as_deref()
            .map(expand)
            .ok_or(ConfigError::Missing("mountpoint"))
    }

    /// Source directory with `~` expanded.
    pub fn source(&self) -> Result<PathBuf, ConfigError> {
        self.source
            .as_deref()
            .map(expand)
            .ok_or(ConfigError::Missing("source"))
    }

    pub fn mount_options(&self) -> MountOptions {
        MountOptions::from(&self.mount)
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    shellexpand::tilde(raw.as_ref()).as_ref().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_config() {
        let config = ProxyConfig::from_ron(
            r#"(
                mountpoint: Some("/mnt/loud"),
                source: Some("/srv/notes"),
                transform: Uppercase,
                hide_dotfiles: true,
                mount: (fs_name: "loud", allow_other: true, auto_unmount: true),
            )"#,
        )
        .unwrap();

        assert_eq!(config.mountpoint().unwrap(), PathBuf::from("/mnt/loud"));
        assert_eq!(config.source().unwrap(), PathBuf::from("/srv/notes"));
        assert_eq!(config.transform, Transform::Uppercase);
        assert!(config.hide_dotfiles);

        let options = config.mount_options();
        assert_eq!(options.fs_name, "loud");
        assert!(options.allow_other);
        assert!(options.auto_unmount);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ProxyConfig::from_ron("()").unwrap();
        assert_eq!(config, ProxyConfig::default());
        assert_eq!(config.transform, Transform::None);
        assert_eq!(config.mount_options(), MountOptions::default());
        assert!(matches!(config.mountpoint(), Err(ConfigError::Missing("mountpoint"))));
        assert!(matches!(config.source(), Err(ConfigError::Missing("source"))));
    }

    #[test]
    fn test_invalid_config() {
        let result = ProxyConfig::from_ron("(transform: Sideways)");
        assert!(matches!(result, Err(ConfigError::Ron(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxy.ron");
        std::fs::write(&path, r#"(source: Some("/srv/data"), hide_dotfiles: true)"#).unwrap();

        let config = ProxyConfig::load(&path).unwrap();
        assert_eq!(config.source, Some(PathBuf::from("/srv/data")));
        assert!(config.hide_dotfiles);
        assert!(config.mountpoint.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = ProxyConfig::load(&dir.path().join("absent.ron"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_tilde_expansion() {
        let expanded = expand(Path::new("~/notes"));
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("notes"));

        assert_eq!(expand(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }
}

//! # fsproxy-server
//!
//! Host side of the proxy: the views the `fsproxy` binary can mount and the
//! config file that selects them.

pub mod config;
pub mod transform;

pub use config::{ConfigError, MountConfig, ProxyConfig};
pub use transform::{Transform, UppercaseFile};

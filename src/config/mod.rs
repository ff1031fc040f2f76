// ABOUTME: Configuration types and parsing for deployer.yml.
// ABOUTME: Holds runner parameters, internal properties, and file discovery.

mod param_value;
mod params;
pub mod target;
pub mod unc;

pub use param_value::{ParamValue, resolve_param_map};
pub use params::*;
pub use target::TargetSpec;

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "deployer.yml";
pub const CONFIG_FILENAME_ALT: &str = "deployer.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".deployer/config.yml";

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployerConfig {
    /// Inbound runner parameters, keyed by the `PARAM_*` constants.
    #[serde(default)]
    pub params: HashMap<String, ParamValue>,

    #[serde(default)]
    pub internal: InternalProperties,
}

/// Administrative settings that are not part of the user-facing parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InternalProperties {
    /// ssh-config style file consulted by the default-key auth method.
    pub ssh_config_path: Option<PathBuf>,
    /// Key used when no config file (or no IdentityFile) is available.
    pub default_key_path: Option<PathBuf>,
    /// Directory holding uploaded keys, one file per key id.
    pub uploaded_keys_dir: Option<PathBuf>,
    pub known_hosts_path: Option<PathBuf>,
    /// Reject unknown host keys instead of trusting them on first use.
    pub strict_host_key_checking: bool,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub silence_threshold: Duration,
    /// Where SMB shares are mounted on hosts without native UNC paths.
    pub smb_mount_root: Option<PathBuf>,
}

impl Default for InternalProperties {
    fn default() -> Self {
        Self {
            ssh_config_path: None,
            default_key_path: None,
            uploaded_keys_dir: None,
            known_hosts_path: None,
            strict_host_key_checking: false,
            connect_timeout: Duration::from_secs(3 * 60),
            poll_interval: Duration::from_millis(500),
            silence_threshold: Duration::from_secs(10),
            smb_mount_root: None,
        }
    }
}

impl InternalProperties {
    /// Configured ssh config path, or `~/.ssh/config`.
    pub fn ssh_config_path(&self) -> Option<PathBuf> {
        self.ssh_config_path
            .clone()
            .or_else(|| home_dir().map(|home| home.join(".ssh").join("config")))
    }

    /// Configured fallback key, or `~/.ssh/id_rsa`.
    pub fn default_key_path(&self) -> Option<PathBuf> {
        self.default_key_path
            .clone()
            .or_else(|| home_dir().map(|home| home.join(".ssh").join("id_rsa")))
    }
}

impl DeployerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Resolve parameter values into the flat string map the runner consumes.
    pub fn runner_params(&self) -> Result<RunnerParams> {
        resolve_param_map(&self.params).map(RunnerParams::new)
    }
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Expand a leading `~/` against `$HOME`.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None if path == "~" => home_dir().unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

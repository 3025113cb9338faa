//! Centralized configuration for the natpierce supervisor.
//!
//! Compile-time constants live in the `*Config` structs. Runtime layout
//! ([`InstallPaths`]) and remote endpoints ([`SourceConfig`]) are plain values
//! handed to the builder so nothing depends on ambient globals.

use crate::error::{NatpierceError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "natpierce";
    pub const PACKAGE_REPO: &'static str = "natpierce/decky-natpierce";
    pub const PLUGIN_LOADER_UNIT: &'static str = "plugin_loader.service";
}

/// Configuration for the supervised core process.
pub struct ProcessConfig;

impl ProcessConfig {
    pub const DEFAULT_CONTROLLER_PORT: u16 = 33272;
    pub const CORE_BINARY_NAME: &'static str = "natpierce";
    pub const LOG_FILE_NAME: &'static str = "core.log";
    /// Kernel module the core needs for its virtual interface.
    pub const KERNEL_MODULE: &'static str = "tun";
    pub const SYS_MODULE_DIR: &'static str = "/sys/module";
    pub const IP_FORWARD_PATH: &'static str = "/proc/sys/net/ipv4/ip_forward";
    /// Environment variables stripped before spawning host-adjacent children.
    pub const SCRUBBED_ENV_VARS: &'static [&'static str] = &["LD_LIBRARY_PATH"];
    pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const GITHUB_API_BASE: &'static str = "https://api.github.com";
    pub const DEFAULT_CA_BUNDLE: &'static str = "/etc/ssl/certs/ca-bundle.crt";
    pub const USER_AGENT: &'static str = "natpierce-supervisor/0.3";
}

/// Shared directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const BIN_DIR_NAME: &'static str = "bin";
    pub const DATA_DIR_NAME: &'static str = "data";
    pub const CONFIG_LINK_NAME: &'static str = "config";
    pub const DURABLE_CONFIG_NAME: &'static str = "natpierce_config";
    pub const BIN_BACKUP_DIR_NAME: &'static str = "bin_backup";
    pub const DOWNLOADS_DIR_NAME: &'static str = "downloads";
    pub const SETTINGS_FILE_NAME: &'static str = "config.json";
}

/// The two installable artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// The supervising package itself.
    Plugin,
    /// The supervised core binary.
    Core,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Plugin, ResourceKind::Core];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Plugin => "plugin",
            ResourceKind::Core => "core",
        }
    }

    /// Parse a resource name as sent by the caller-facing layer.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "plugin" => Ok(ResourceKind::Plugin),
            "core" => Ok(ResourceKind::Core),
            _ => Err(NatpierceError::InvalidResource(s.to_string())),
        }
    }

    /// URL of the installable artifact for `version`.
    pub fn download_url(&self, sources: &SourceConfig, version: &str) -> String {
        match self {
            ResourceKind::Plugin => sources
                .plugin_download_template
                .replace("{repo}", &sources.package_repo)
                .replace("{version}", version),
            ResourceKind::Core => sources
                .core_download_template
                .replace("{version}", version.trim_start_matches(['v', 'V'])),
        }
    }

    /// URL queried for the latest available version.
    pub fn latest_version_url(&self, sources: &SourceConfig) -> String {
        match self {
            ResourceKind::Plugin => format!(
                "{}/repos/{}/releases/latest",
                sources.github_api_base, sources.package_repo
            ),
            ResourceKind::Core => sources.core_version_url.clone(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = NatpierceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Remote endpoints for version discovery and artifact download.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// GitHub `owner/name` of the supervising package.
    pub package_repo: String,
    pub github_api_base: String,
    /// Plain-text page holding the latest core version.
    pub core_version_url: String,
    /// Template with `{repo}` and `{version}` placeholders.
    pub plugin_download_template: String,
    /// Template with a `{version}` placeholder (version without leading `v`).
    pub core_download_template: String,
    /// Directory inside the plugin archive holding the package files.
    pub plugin_archive_root: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            package_repo: AppConfig::PACKAGE_REPO.to_string(),
            github_api_base: NetworkConfig::GITHUB_API_BASE.to_string(),
            core_version_url: "https://www.natpierce.cn/tempdir/info/version.html".to_string(),
            plugin_download_template:
                "https://github.com/{repo}/releases/download/{version}/decky-natpierce.zip"
                    .to_string(),
            core_download_template:
                "https://natpierce.oss-cn-beijing.aliyuncs.com/linux/natpierce-amd64-v{version}.tar.gz"
                    .to_string(),
            plugin_archive_root: "DeckyNatpierce".to_string(),
        }
    }
}

/// On-disk layout of one installation.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    /// Installation root of the supervising package.
    pub plugin_dir: PathBuf,
    /// Scratch space: downloads, backups, migrated data.
    pub runtime_dir: PathBuf,
    /// Durable settings and the core's configuration.
    pub settings_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl InstallPaths {
    pub fn new(
        plugin_dir: impl Into<PathBuf>,
        runtime_dir: impl Into<PathBuf>,
        settings_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            runtime_dir: runtime_dir.into(),
            settings_dir: settings_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Lay every directory out under one root (handy for tests and the CLI).
    pub fn under(root: &Path) -> Self {
        Self::new(
            root.join("plugin"),
            root.join("runtime"),
            root.join("settings"),
            root.join("logs"),
        )
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.plugin_dir.join(PathsConfig::BIN_DIR_NAME)
    }

    pub fn core_binary(&self) -> PathBuf {
        self.bin_dir().join(ProcessConfig::CORE_BINARY_NAME)
    }

    /// Symlink the core reads its configuration through.
    pub fn core_config_link(&self) -> PathBuf {
        self.bin_dir()
            .join(PathsConfig::DATA_DIR_NAME)
            .join(PathsConfig::CONFIG_LINK_NAME)
    }

    pub fn durable_core_config(&self) -> PathBuf {
        self.settings_dir.join(PathsConfig::DURABLE_CONFIG_NAME)
    }

    pub fn core_log(&self) -> PathBuf {
        self.log_dir.join(ProcessConfig::LOG_FILE_NAME)
    }

    pub fn bin_backup_dir(&self) -> PathBuf {
        self.runtime_dir.join(PathsConfig::BIN_BACKUP_DIR_NAME)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.runtime_dir.join(PathsConfig::DOWNLOADS_DIR_NAME)
    }

    /// Legacy data directory shipped inside the package, migrated on start-up.
    pub fn legacy_data_dir(&self) -> PathBuf {
        self.plugin_dir.join(PathsConfig::DATA_DIR_NAME)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.settings_dir.join(PathsConfig::SETTINGS_FILE_NAME)
    }
}

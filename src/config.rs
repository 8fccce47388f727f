//! Centralized configuration for the plugin subsystem.
//!
//! All limits, timeouts and defaults live here. The byte and process limits
//! can be overridden by environment variables so self-hosted panels can
//! loosen or tighten them without a rebuild.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Default maximum plugin archive / cumulative download size in bytes (256 MiB).
/// Override with `MAST_PLUGIN_MAX_IMPORT_SIZE` (bytes).
pub const DEFAULT_MAX_IMPORT_SIZE: u64 = 256 * 1024 * 1024;

/// Cap on cumulative decompressed bytes, as a multiple of the archive size
/// ceiling. A size check on the archive alone does not stop high-ratio
/// zip bombs.
pub const MAX_DECOMPRESSION_RATIO: u64 = 100;

/// Connect timeout for all HTTP requests.
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Total timeout for a direct archive download.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Total timeout for a single listing-API request or raw-file download
/// during a remote folder walk.
pub const API_TIMEOUT_SECS: u64 = 30;

/// Maximum directory depth followed during a remote folder walk.
pub const MAX_TREE_DEPTH: usize = 32;

/// Timeout for one batched package-manager invocation.
pub const PACKAGE_MANAGER_TIMEOUT_SECS: u64 = 600;

/// Timeout for the asset dependency-install step.
pub const ASSET_INSTALL_TIMEOUT_SECS: u64 = 300;

/// Timeout for the asset build step.
pub const ASSET_BUILD_TIMEOUT_SECS: u64 = 600;

/// Default host package manager binary.
/// Override with `MAST_PACKAGE_MANAGER`.
pub const DEFAULT_PACKAGE_MANAGER: &str = "composer";

/// Environment variable enabling developer mode (plugin errors propagate
/// instead of being recorded and swallowed).
pub const DEV_MODE_ENV: &str = "MAST_PLUGIN_DEV_MODE";

/// Runtime settings for the plugin subsystem, resolved once at panel boot.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Panel installation root (working directory for the package manager
    /// and asset builds).
    pub panel_root: PathBuf,

    /// Directory holding one subdirectory per plugin.
    pub plugins_root: PathBuf,

    /// Version of the running panel, used for compatibility checks.
    pub panel_version: semver::Version,

    /// Maximum archive / cumulative download size in bytes.
    pub max_import_size: u64,

    /// Developer mode: plugin errors propagate to the caller unmodified.
    pub dev_mode: bool,

    /// Host package manager binary name.
    pub package_manager: String,
}

impl Settings {
    /// Create settings for a panel rooted at `panel_root`, applying any
    /// environment overrides.
    pub fn new(panel_root: impl Into<PathBuf>, panel_version: &str) -> Result<Self> {
        let panel_root = panel_root.into();
        let plugins_root = panel_root.join("plugins");
        Ok(Self {
            panel_root,
            plugins_root,
            panel_version: semver::Version::parse(panel_version)?,
            max_import_size: max_import_size_from_env(),
            dev_mode: dev_mode_from_env(),
            package_manager: package_manager_from_env(),
        })
    }

    /// Path of a plugin's directory under the plugins root.
    pub fn plugin_dir(&self, id: &str) -> PathBuf {
        self.plugins_root.join(id)
    }

    /// Path inside a plugin's directory.
    pub fn plugin_path(&self, id: &str, rel: impl AsRef<Path>) -> PathBuf {
        self.plugins_root.join(id).join(rel)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(CONNECT_TIMEOUT_SECS)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(DOWNLOAD_TIMEOUT_SECS)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(API_TIMEOUT_SECS)
    }
}

/// Get the archive size ceiling from env var or default.
pub fn max_import_size_from_env() -> u64 {
    std::env::var("MAST_PLUGIN_MAX_IMPORT_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_IMPORT_SIZE)
}

/// Get the developer-mode flag from the environment.
pub fn dev_mode_from_env() -> bool {
    std::env::var(DEV_MODE_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Get the package manager binary from env var or default.
pub fn package_manager_from_env() -> String {
    std::env::var("MAST_PACKAGE_MANAGER").unwrap_or_else(|_| DEFAULT_PACKAGE_MANAGER.to_string())
}

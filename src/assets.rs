//! Frontend asset pipeline.
//!
//! Plugins can ship UI resources that must be compiled into the panel's
//! asset bundle. Install, update and uninstall all finish with a dependency
//! install plus a full rebuild from the panel root.

use std::time::Duration;

use crate::config::{Settings, ASSET_BUILD_TIMEOUT_SECS, ASSET_INSTALL_TIMEOUT_SECS};
use crate::error::{PluginError, Result};
use crate::process;

/// Rebuilds the panel's frontend assets.
pub trait AssetBuilder {
    /// Install frontend dependencies.
    fn install(&self) -> Result<()>;

    /// Compile the asset bundle.
    fn build(&self) -> Result<()>;
}

/// `AssetBuilder` backed by yarn, run from the panel root.
pub struct YarnAssetBuilder<'a> {
    settings: &'a Settings,
}

impl<'a> YarnAssetBuilder<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    fn run(&self, subcommand: &str, timeout: Duration) -> Result<()> {
        let output = process::run_with_timeout(
            "yarn",
            &[subcommand],
            &self.settings.panel_root,
            timeout,
        )?;
        if !output.success {
            return Err(PluginError::AssetBuild(format!(
                "yarn {} failed: {}",
                subcommand, output.stderr
            )));
        }
        Ok(())
    }
}

impl AssetBuilder for YarnAssetBuilder<'_> {
    fn install(&self) -> Result<()> {
        log::debug!("installing frontend dependencies");
        self.run("install", Duration::from_secs(ASSET_INSTALL_TIMEOUT_SECS))
    }

    fn build(&self) -> Result<()> {
        log::debug!("rebuilding frontend assets");
        self.run("build", Duration::from_secs(ASSET_BUILD_TIMEOUT_SECS))
    }
}

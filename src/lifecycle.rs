//! Lifecycle Orchestrator - install, update, uninstall, enable, disable.
//!
//! Drives the state machine persisted in each plugin's `plugin.json`:
//!
//! ```text
//! not_installed --install--> enabled | disabled
//! enabled <--enable/disable--> disabled
//! any --failed step--> errored (developer mode propagates instead)
//! * --uninstall--> not_installed (files kept) or gone (files deleted)
//! ```
//!
//! Every external effect goes through a trait object so the orchestration
//! can be tested against recording fakes. Outside developer mode a failing
//! step records `errored` with the failure message and returns success to
//! the caller; the panel keeps booting with one broken plugin rather than
//! not booting at all.

use std::fs;
use std::path::Path;

use crate::archive;
use crate::assets::AssetBuilder;
use crate::config::Settings;
use crate::error::{PluginError, Result};
use crate::fetch::{Fetcher, PluginSource};
use crate::manifest::{self, PluginManifest, PluginStatus};
use crate::reconciler::{self, PackageManager};
use crate::registry::PluginRegistry;

/// Relative path of a plugin's migration scripts.
pub const MIGRATIONS_DIR: &str = "database/migrations";

/// Applies and rolls back a plugin's database migrations.
pub trait Migrator {
    fn run(&self, migrations: &Path) -> Result<()>;
    fn rollback(&self, migrations: &Path) -> Result<()>;
}

/// Runs a plugin's named seeder after its migrations.
pub trait Seeder {
    fn run_seeder(&self, class: &str) -> Result<()>;
}

/// Orchestrates plugin lifecycle transitions.
///
/// Mutating operations take `&mut self`, which serializes lifecycle
/// transitions within the panel process.
pub struct PluginManager<'a> {
    settings: &'a Settings,
    pub registry: PluginRegistry,
    packages: &'a dyn PackageManager,
    migrator: &'a dyn Migrator,
    seeder: &'a dyn Seeder,
    assets: &'a dyn AssetBuilder,
}

impl<'a> PluginManager<'a> {
    /// Scan the plugins root and wire up the external collaborators.
    pub fn new(
        settings: &'a Settings,
        packages: &'a dyn PackageManager,
        migrator: &'a dyn Migrator,
        seeder: &'a dyn Seeder,
        assets: &'a dyn AssetBuilder,
    ) -> Result<Self> {
        Ok(Self {
            settings,
            registry: PluginRegistry::scan(&settings.plugins_root)?,
            packages,
            migrator,
            seeder,
            assets,
        })
    }

    /// Fetch a bundle, extract it and register the plugin, leaving it
    /// `not_installed`. Returns the plugin id.
    pub fn import(&mut self, fetcher: &Fetcher, source: &PluginSource) -> Result<String> {
        let bundle = fetcher.fetch(source)?;
        archive::extract_bundle(self.settings, &bundle.archive, &bundle.name, false)?;
        let plugin = self.registry.register(&bundle.name)?;
        log::debug!("imported plugin '{}' v{}", plugin.id, plugin.version);
        Ok(plugin.id.clone())
    }

    /// Run the install pipeline for a registered plugin: reconcile host
    /// packages, rebuild assets, apply migrations, run the seeder, then
    /// persist the final status.
    ///
    /// Without `enable`, a fresh plugin lands on `disabled`; a plugin that
    /// already had a lifecycle status keeps it (update flows re-run this
    /// pipeline without changing what the user chose).
    pub fn install(&mut self, id: &str, enable: bool) -> Result<()> {
        let plugin = self.registry.require(id)?.clone();
        let result = self.run_install_steps(&plugin, enable);
        self.guard(id, result)
    }

    fn run_install_steps(&mut self, plugin: &PluginManifest, enable: bool) -> Result<()> {
        reconciler::reconcile(
            &self.registry,
            self.packages,
            plugin.packages.as_ref(),
            None,
        )?;

        self.assets.install()?;
        self.assets.build()?;

        let migrations = self.settings.plugin_path(&plugin.id, MIGRATIONS_DIR);
        if migrations.is_dir() {
            self.migrator.run(&migrations)?;
        }

        if let Some(seeder) = &plugin.seeder {
            self.seeder.run_seeder(seeder)?;
        }

        let status = if enable {
            PluginStatus::Enabled
        } else if plugin.meta.status == PluginStatus::NotInstalled {
            PluginStatus::Disabled
        } else {
            plugin.meta.status
        };
        self.registry.set_status(&plugin.id, status, None)
    }

    /// Replace a plugin's files from its update URL and re-run the install
    /// pipeline, preserving its current status. A plugin without an update
    /// URL is left alone.
    pub fn update(&mut self, id: &str, fetcher: &Fetcher) -> Result<()> {
        let plugin = self.registry.require(id)?.clone();
        let Some(url) = plugin.update_url.clone() else {
            log::warn!("plugin '{}' has no update URL, skipping update", id);
            return Ok(());
        };

        // A failed download touches nothing, so the plugin keeps its prior
        // status and the caller sees the fetch error directly.
        let bundle = fetcher.fetch(&PluginSource::Url(url))?;

        let result = (|| {
            // Clean extraction: files dropped by the new version must not
            // survive from the old one.
            archive::extract_bundle(self.settings, &bundle.archive, id, true)?;
            // Distributed bundles ship without a meta block; restore the
            // lifecycle state the user owns (status, load order,
            // installed_at) before trusting the fresh manifest.
            let prior = plugin.meta.clone();
            manifest::update_meta(&self.registry.manifest_path(id), |meta| *meta = prior)?;
            self.registry.reload(id)?;
            let reloaded = self.registry.require(id)?.clone();
            self.run_install_steps(&reloaded, false)?;
            self.registry.clear_update_marker(id)
        })();
        self.guard(id, result)
    }

    /// Tear a plugin down: roll back its migrations, drop or park its
    /// record, rebuild assets and remove host packages nothing else needs.
    ///
    /// With `delete_files` the plugin directory is removed; otherwise the
    /// files stay and the plugin returns to `not_installed`.
    pub fn uninstall(&mut self, id: &str, delete_files: bool) -> Result<()> {
        let plugin = self.registry.require(id)?.clone();
        let result = self.run_uninstall_steps(&plugin, delete_files);
        self.guard(id, result)
    }

    fn run_uninstall_steps(&mut self, plugin: &PluginManifest, delete_files: bool) -> Result<()> {
        let migrations = self.settings.plugin_path(&plugin.id, MIGRATIONS_DIR);
        if migrations.is_dir() {
            self.migrator.rollback(&migrations)?;
        }

        if delete_files {
            let dir = self.registry.plugin_dir(&plugin.id);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            self.registry.remove_record(&plugin.id);
        } else {
            self.registry
                .set_status(&plugin.id, PluginStatus::NotInstalled, None)?;
        }

        self.assets.install()?;
        self.assets.build()?;

        // The departing plugin is already out of the loadable set, so the
        // recomputed union keeps anything another plugin still declares.
        reconciler::reconcile(&self.registry, self.packages, None, plugin.packages.as_ref())
    }

    /// Enable an installed plugin. Fails if its panel-version bound does not
    /// match the running panel, recording `incompatible` on the way out.
    pub fn enable(&mut self, id: &str) -> Result<()> {
        let plugin = self.registry.require(id)?;
        if !plugin.is_compatible(&self.settings.panel_version) {
            let message = plugin.compat_message(&self.settings.panel_version);
            self.registry
                .set_status(id, PluginStatus::Incompatible, Some(&message))?;
            return Err(PluginError::Incompatible(message));
        }

        self.registry.enable(id)?;
        reconciler::reconcile(&self.registry, self.packages, None, None)
    }

    /// Disable a plugin and drop host packages only it declared.
    pub fn disable(&mut self, id: &str) -> Result<()> {
        let old = self.registry.require(id)?.packages.clone();
        self.registry.disable(id)?;
        reconciler::reconcile(&self.registry, self.packages, None, old.as_ref())
    }

    /// Error policy shared by every lifecycle operation: in developer mode
    /// failures propagate unmodified; otherwise the plugin is parked on
    /// `errored` with the failure message and the operation reports success.
    fn guard(&mut self, id: &str, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if self.settings.dev_mode => Err(e),
            Err(e) => {
                log::error!("plugin '{}' failed: {}", id, e);
                self.registry
                    .set_status(id, PluginStatus::Errored, Some(&e.to_string()))?;
                Ok(())
            }
        }
    }
}

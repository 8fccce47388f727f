//! Plugin Registry - the queryable index over installed plugins.
//!
//! One directory per plugin lives under the plugins root, each carrying a
//! `plugin.json`. Those files are the durable source of truth; the registry
//! is rebuilt from them with [`PluginRegistry::scan`] and kept in sync by
//! routing every status-affecting write through the manifest's atomic
//! read-merge-write.
//!
//! Mutating methods take `&mut self`, which serializes lifecycle operations
//! within the panel process. A directory without a readable manifest is
//! skipped with a warning rather than aborting the scan.


use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{PluginError, Result};
use crate::manifest::{self, PluginManifest, PluginStatus};
use crate::PLUGIN_MANIFEST;

/// Index of all plugins found under the plugins root.
#[derive(Debug)]
pub struct PluginRegistry {
    root: PathBuf,
    plugins: BTreeMap<String, PluginManifest>,
}

impl PluginRegistry {
    /// Build a registry by scanning the plugins root.
    ///
    /// A missing root yields an empty registry. Directories without a
    /// parseable manifest, or whose manifest id does not match the directory
    /// name, are reported and skipped - they are never loaded half-broken.
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut plugins = BTreeMap::new();

        if !root.exists() {
            log::debug!("plugins root {:?} does not exist yet", root);
            return Ok(Self { root, plugins });
        }

        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let manifest_path = entry.path().join(PLUGIN_MANIFEST);

            if !manifest_path.exists() {
                log::warn!(
                    "skipping '{}': no {} found (partially deleted plugin?)",
                    dir_name,
                    PLUGIN_MANIFEST
                );
                continue;
            }

            match PluginManifest::load(&manifest_path) {
                Ok(manifest) if manifest.id == dir_name => {
                    plugins.insert(manifest.id.clone(), manifest);
                }
                Ok(manifest) => {
                    log::warn!(
                        "skipping '{}': manifest id '{}' does not match directory name",
                        dir_name,
                        manifest.id
                    );
                }
                Err(e) => {
                    log::warn!("skipping '{}': {}", dir_name, e);
                }
            }
        }

        log::debug!("registry scan found {} plugin(s)", plugins.len());
        Ok(Self { root, plugins })
    }

    /// The plugins root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a plugin (whether or not it is registered).
    pub fn plugin_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Path of a plugin's `plugin.json`.
    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.root.join(id).join(PLUGIN_MANIFEST)
    }

    pub fn get(&self, id: &str) -> Option<&PluginManifest> {
        self.plugins.get(id)
    }

    /// Get a plugin or fail with `UnknownPlugin`.
    pub fn require(&self, id: &str) -> Result<&PluginManifest> {
        self.plugins
            .get(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// All plugins in boot order: ascending load order, ties broken by id.
    pub fn ordered(&self) -> Vec<&PluginManifest> {
        let mut list: Vec<&PluginManifest> = self.plugins.values().collect();
        list.sort_by(|a, b| {
            a.meta
                .load_order
                .cmp(&b.meta.load_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    /// Ids in boot order.
    pub fn ordered_ids(&self) -> Vec<String> {
        self.ordered().iter().map(|p| p.id.clone()).collect()
    }

    /// Plugins that should be wired at boot and counted during dependency
    /// reconciliation, in boot order.
    pub fn loadable(&self) -> Vec<&PluginManifest> {
        self.ordered()
            .into_iter()
            .filter(|p| p.should_load())
            .collect()
    }

    /// Persist a status change to `plugin.json` and the in-memory record.
    ///
    /// Status and message are always written together; the message is forced
    /// to `None` unless the new status is `Errored` or `Incompatible`, so a
    /// successful transition can never leave a stale message behind.
    pub fn set_status(
        &mut self,
        id: &str,
        status: PluginStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let message = match status {
            PluginStatus::Errored | PluginStatus::Incompatible => message.map(str::to_string),
            _ => None,
        };

        let path = self.manifest_path(id);
        if !path.exists() {
            // Matches the forgiving behavior of the reference panel: a status
            // write against deleted files is a no-op, not a crash.
            log::warn!("cannot persist status for '{}': {} missing", id, path.display());
            return Ok(());
        }

        let meta = manifest::update_meta(&path, |meta| {
            meta.status = status;
            meta.status_message = message;
        })?;

        if let Some(plugin) = self.plugins.get_mut(id) {
            plugin.meta = meta;
        }

        log::debug!("plugin '{}' is now {}", id, status);
        Ok(())
    }

    pub fn enable(&mut self, id: &str) -> Result<()> {
        self.set_status(id, PluginStatus::Enabled, None)
    }

    pub fn disable(&mut self, id: &str) -> Result<()> {
        self.set_status(id, PluginStatus::Disabled, None)
    }

    /// Persist a user-chosen load order: each id in `order` gets its index.
    pub fn set_load_order(&mut self, order: &[String]) -> Result<()> {
        for (index, id) in order.iter().enumerate() {
            let path = self.manifest_path(id);
            if !path.exists() {
                continue;
            }
            let meta = manifest::update_meta(&path, |meta| {
                meta.load_order = index as i64;
            })?;
            if let Some(plugin) = self.plugins.get_mut(id) {
                plugin.meta = meta;
            }
        }
        Ok(())
    }

    /// Register a freshly extracted plugin directory.
    ///
    /// Parses its manifest, enforces the id/directory invariant and stamps
    /// `installed_at` on first registration.
    pub fn register(&mut self, id: &str) -> Result<&PluginManifest> {
        let path = self.manifest_path(id);
        let mut manifest = PluginManifest::load(&path)?;

        if manifest.id != id {
            return Err(PluginError::InvalidBundle(format!(
                "manifest id '{}' does not match directory name '{}'",
                manifest.id, id
            )));
        }

        if manifest.meta.installed_at.is_none() {
            manifest.meta = manifest::update_meta(&path, |meta| {
                meta.installed_at = Some(Utc::now());
            })?;
        }

        self.plugins.insert(id.to_string(), manifest);
        self.require(id)
    }

    /// Re-read a plugin's manifest from disk (after an update replaced its
    /// files).
    pub fn reload(&mut self, id: &str) -> Result<()> {
        self.register(id).map(|_| ())
    }

    /// Drop the in-memory record (used together with file deletion).
    pub fn remove_record(&mut self, id: &str) -> Option<PluginManifest> {
        self.plugins.remove(id)
    }

    /// Clear the cached "update available" marker after an update.
    pub fn clear_update_marker(&mut self, id: &str) -> Result<()> {
        let path = self.manifest_path(id);
        if !path.exists() {
            return Ok(());
        }
        let meta = manifest::update_meta(&path, |meta| {
            meta.update_available = None;
        })?;
        if let Some(plugin) = self.plugins.get_mut(id) {
            plugin.meta = meta;
        }
        Ok(())
    }

    /// Whether any enabled plugin is a theme. Themes gate UI registration in
    /// the host panel.
    pub fn has_theme_enabled(&self) -> bool {
        self.plugins
            .values()
            .any(|p| p.theme && p.meta.status == PluginStatus::Enabled)
    }

    /// Locales contributed by enabled language plugins: the subdirectory
    /// names of each plugin's `lang/` directory, deduplicated.
    pub fn plugin_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = Vec::new();

        for plugin in self.ordered() {
            if plugin.meta.status != PluginStatus::Enabled || !plugin.language {
                continue;
            }
            let lang_dir = self.plugin_dir(&plugin.id).join("lang");
            let Ok(entries) = fs::read_dir(&lang_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    languages.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }

        languages.sort();
        languages.dedup();
        languages
    }
}

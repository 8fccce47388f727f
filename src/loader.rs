//! Runtime Loader - wires installed plugins into the host panel at boot.
//!
//! Boot is a pure read of the registry plus a series of registrations
//! against the host, expressed through [`HostExtensions`] so this crate
//! never loads code itself. The walk is deterministic: ascending load
//! order, ties broken by id.
//!
//! Two status transitions happen automatically during boot:
//!
//! * a plugin whose panel-version bound no longer matches is parked on
//!   `incompatible` with an explanatory message
//! * a previously `incompatible` plugin whose bound matches again drops to
//!   `disabled` - never straight back to `enabled`, the user re-enables
//!
//! Namespace and config registration happen for every compatible plugin,
//! enabled or not, so the panel can always render plugin metadata. Everything else is
//! gated on `should_load`. A plugin that fails to wire is parked on
//! `errored` and the boot continues; an `errored` plugin that wires cleanly
//! is promoted back to `enabled`.

use std::collections::HashSet;
use std::path::Path;

use crate::config::Settings;
use crate::error::Result;
use crate::lifecycle::MIGRATIONS_DIR;
use crate::manifest::PluginStatus;
use crate::registry::PluginRegistry;

/// Extension points a plugin can contribute to the host panel.
///
/// Implemented by the embedding panel; this crate only decides what gets
/// registered and in which order.
pub trait HostExtensions {
    /// Make the plugin's code namespace resolvable from its source
    /// directory.
    fn register_module(&mut self, namespace: &str, src: &Path) -> Result<()>;

    /// Expose the plugin's configuration directory.
    fn register_config(&mut self, id: &str, dir: &Path) -> Result<()>;

    /// Register a translation directory. `namespace` is `None` for language
    /// packs, whose translations merge into the panel's root namespace.
    fn register_translations(&mut self, namespace: Option<&str>, dir: &Path) -> Result<()>;

    /// Register a service provider by name.
    fn register_provider(&mut self, provider: &str) -> Result<()>;

    /// Register a console command by name.
    fn register_command(&mut self, command: &str) -> Result<()>;

    /// Make the plugin's migrations visible to the host's migration runner.
    fn register_migrations(&mut self, dir: &Path) -> Result<()>;

    /// Register a namespaced view directory.
    fn register_views(&mut self, namespace: &str, dir: &Path) -> Result<()>;

    /// Activate a theme plugin.
    fn activate_theme(&mut self, id: &str, dir: &Path) -> Result<()>;
}

/// Wires registered plugins into the host at boot.
pub struct RuntimeLoader {
    /// Namespaces already registered in this process; a re-boot must not
    /// register the same namespace twice.
    wired: HashSet<String>,
}

impl RuntimeLoader {
    pub fn new() -> Self {
        Self {
            wired: HashSet::new(),
        }
    }

    /// Walk all plugins in boot order and wire the loadable ones.
    pub fn load_all(
        &mut self,
        settings: &Settings,
        registry: &mut PluginRegistry,
        host: &mut dyn HostExtensions,
    ) -> Result<()> {
        for id in registry.ordered_ids() {
            let dir = registry.plugin_dir(&id);
            if !dir.is_dir() {
                log::warn!("plugin '{}' has no directory, skipping", id);
                continue;
            }

            let plugin = match registry.get(&id) {
                Some(plugin) => plugin,
                None => continue,
            };

            let compatible = plugin.is_compatible(&settings.panel_version);
            if !compatible {
                let message = plugin.compat_message(&settings.panel_version);
                log::warn!("plugin '{}' is incompatible: {}", id, message);
                registry.set_status(&id, PluginStatus::Incompatible, Some(&message))?;
                continue;
            }
            if plugin.meta.status == PluginStatus::Incompatible {
                // Bound matches again after a panel upgrade; hand control
                // back to the user instead of silently re-enabling.
                registry.set_status(&id, PluginStatus::Disabled, None)?;
            }

            let plugin = match registry.get(&id) {
                Some(plugin) => plugin.clone(),
                None => continue,
            };

            if self.wired.insert(plugin.namespace.clone()) {
                host.register_module(&plugin.namespace, &dir.join("src"))?;
            }
            let config_dir = dir.join("config");
            if config_dir.is_dir() {
                host.register_config(&id, &config_dir)?;
            }

            if !plugin.should_load() {
                continue;
            }

            let result = wire_plugin(&plugin, &dir, host);
            match result {
                Ok(()) => {
                    if plugin.meta.status == PluginStatus::Errored {
                        log::debug!("plugin '{}' recovered, re-enabling", id);
                        registry.set_status(&id, PluginStatus::Enabled, None)?;
                    }
                }
                Err(e) if settings.dev_mode => return Err(e),
                Err(e) => {
                    log::error!("plugin '{}' failed to load: {}", id, e);
                    registry.set_status(&id, PluginStatus::Errored, Some(&e.to_string()))?;
                }
            }
        }

        Ok(())
    }
}

impl Default for RuntimeLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn wire_plugin(
    plugin: &crate::manifest::PluginManifest,
    dir: &Path,
    host: &mut dyn HostExtensions,
) -> Result<()> {
    let lang_dir = dir.join("lang");
    if lang_dir.is_dir() {
        let namespace = if plugin.language {
            None
        } else {
            Some(plugin.id.as_str())
        };
        host.register_translations(namespace, &lang_dir)?;
    }

    for provider in &plugin.providers {
        host.register_provider(provider)?;
    }
    for command in &plugin.commands {
        host.register_command(command)?;
    }

    let migrations = dir.join(MIGRATIONS_DIR);
    if migrations.is_dir() {
        host.register_migrations(&migrations)?;
    }

    let views = dir.join("resources/views");
    if views.is_dir() {
        host.register_views(&plugin.id, &views)?;
    }

    if plugin.theme {
        host.activate_theme(&plugin.id, dir)?;
    }

    Ok(())
}

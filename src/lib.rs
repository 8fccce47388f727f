//! Mast Plugin Manager
//!
//! This library is the plugin subsystem of the Mast server panel. Plugins are
//! independently distributable bundles (code, config, migrations, views,
//! translations) dropped into the panel's `plugins/` directory, each described
//! by a `plugin.json` manifest.
//!
//! ## Architecture
//!
//! - **Fetcher**: turns an uploaded archive, a direct URL or a GitHub folder
//!   reference into a validated local zip file
//! - **Archive validation**: size ceilings and path-traversal checks before
//!   anything is extracted into the plugins root
//! - **Plugin Registry**: in-memory index over the per-plugin `plugin.json`
//!   files, which are the durable source of truth for lifecycle state
//! - **Dependency Reconciler**: keeps the panel's external package set in
//!   sync with the union of all loadable plugins' declared dependencies
//! - **Lifecycle**: install / update / uninstall / enable / disable
//!   workflows with per-plugin failure isolation
//! - **Runtime Loader**: wires compatible, enabled plugins into the panel's
//!   extension points on every boot
//!
//! ## Storage
//!
//! One directory per plugin under the plugins root; `plugins/<id>/plugin.json`
//! carries both the static manifest and the mutable `meta` block (status,
//! status message, load order).

pub mod archive;
pub mod assets;
pub mod config;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod process;
pub mod reconciler;
pub mod registry;

pub use assets::{AssetBuilder, YarnAssetBuilder};
pub use config::Settings;
pub use error::{PluginError, Result};
pub use fetch::{Fetcher, PluginSource};
pub use lifecycle::{Migrator, PluginManager, Seeder};
pub use loader::{HostExtensions, RuntimeLoader};
pub use manifest::{PluginManifest, PluginStatus};
pub use reconciler::{PackageManager, ProcessPackageManager};
pub use registry::PluginRegistry;

/// File name of the per-plugin manifest.
pub const PLUGIN_MANIFEST: &str = "plugin.json";

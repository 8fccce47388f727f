//! Dependency Reconciler - keeps the host package set equal to the union of
//! what loadable plugins declare.
//!
//! Plugins do not own host packages; they declare needs. Before every
//! reconciliation the union is recomputed from scratch across all loadable
//! plugins, so a package required by two plugins survives the removal of
//! one of them, and a package nobody declares anymore is removed.
//!
//! Package-manager calls are batched: one `require` for all additions, one
//! `remove` for all removals, never one process per package.

use serde_json::Map;

use crate::config::{Settings, PACKAGE_MANAGER_TIMEOUT_SECS};
use crate::error::{PluginError, Result};
use crate::manifest::PackageMap;
use crate::process;
use crate::registry::PluginRegistry;

/// Host package-manager operations, batched.
///
/// Split out as a trait so reconciliation logic can be exercised without a
/// real package manager on the machine.
pub trait PackageManager {
    /// Install or update the given `name:constraint` specs in one batch.
    fn add(&self, specs: &[String]) -> Result<()>;

    /// Remove the given package names in one batch.
    fn remove(&self, packages: &[String]) -> Result<()>;
}

/// `PackageManager` backed by the configured host binary (composer by
/// default), run from the panel root.
pub struct ProcessPackageManager<'a> {
    settings: &'a Settings,
}

impl<'a> ProcessPackageManager<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    fn run(&self, verb: &str, items: &[String]) -> Result<()> {
        let mut args: Vec<&str> = vec![verb];
        args.extend(items.iter().map(String::as_str));

        let output = process::run_with_timeout(
            &self.settings.package_manager,
            &args,
            &self.settings.panel_root,
            std::time::Duration::from_secs(PACKAGE_MANAGER_TIMEOUT_SECS),
        )?;

        if !output.success {
            // Surface the tool's own diagnostics untouched; they name the
            // conflicting constraints better than we can.
            return Err(PluginError::PackageManager(output.stderr));
        }
        Ok(())
    }
}

impl PackageManager for ProcessPackageManager<'_> {
    fn add(&self, specs: &[String]) -> Result<()> {
        log::debug!("package manager require: {:?}", specs);
        self.run("require", specs)
    }

    fn remove(&self, packages: &[String]) -> Result<()> {
        log::debug!("package manager remove: {:?}", packages);
        self.run("remove", packages)
    }
}

/// Recompute the desired host package set and converge the machine to it.
///
/// The desired set is the union of `packages` across loadable plugins in
/// boot order, with `new` (the plugin currently being installed or updated)
/// layered on top. When two plugins pin the same package, the later
/// declaration wins and the clash is logged.
///
/// `old` is the package map the departing or replaced plugin used to
/// declare: any of its keys absent from the recomputed union are removed.
pub fn reconcile(
    registry: &PluginRegistry,
    pm: &dyn PackageManager,
    new: Option<&PackageMap>,
    old: Option<&PackageMap>,
) -> Result<()> {
    let mut desired: Map<String, serde_json::Value> = Map::new();

    let mut layers: Vec<&PackageMap> = registry
        .loadable()
        .iter()
        .filter_map(|p| p.packages.as_ref())
        .collect();
    if let Some(new) = new {
        layers.push(new);
    }

    for layer in layers {
        for (package, constraint) in layer {
            if let Some(previous) = desired.get(package) {
                if previous != constraint {
                    log::warn!(
                        "package '{}' is pinned to both {} and {}; keeping the latter",
                        package,
                        constraint_str(previous),
                        constraint_str(constraint)
                    );
                }
            }
            desired.insert(package.clone(), constraint.clone());
        }
    }

    let removals: Vec<String> = old
        .map(|old| {
            old.keys()
                .filter(|package| !desired.contains_key(*package))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    if !desired.is_empty() {
        let specs: Vec<String> = desired
            .iter()
            .map(|(package, constraint)| format!("{}:{}", package, constraint_str(constraint)))
            .collect();
        pm.add(&specs)?;
    }

    if !removals.is_empty() {
        pm.remove(&removals)?;
    }

    Ok(())
}

fn constraint_str(constraint: &serde_json::Value) -> String {
    match constraint.as_str() {
        Some(s) => s.to_string(),
        None => constraint.to_string(),
    }
}

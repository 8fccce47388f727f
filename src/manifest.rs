//! The `plugin.json` data model.
//!
//! Each plugin directory carries exactly one `plugin.json`. The static
//! fields describe the plugin; the `meta` block holds the mutable lifecycle
//! state (status, status message, load order) and is the durable source of
//! truth the registry indexes. Status writes go through [`update_meta`],
//! which merges into the existing file so fields this crate does not know
//! about survive untouched.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PluginError, Result};

/// Ordered external-package manifest: package name -> version constraint.
/// Owned by the plugin and not interpreted by the registry.
pub type PackageMap = serde_json::Map<String, Value>;

/// Lifecycle status of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    /// Files are present but the plugin has never been installed (or was
    /// uninstalled without deleting files).
    #[default]
    NotInstalled,
    Enabled,
    Disabled,
    /// A lifecycle step or boot wiring failed; see `status_message`.
    Errored,
    /// Version-bound check failed on a boot scan. Entered and left
    /// automatically, never by user action.
    Incompatible,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginStatus::NotInstalled => "not installed",
            PluginStatus::Enabled => "enabled",
            PluginStatus::Disabled => "disabled",
            PluginStatus::Errored => "errored",
            PluginStatus::Incompatible => "incompatible",
        };
        write!(f, "{s}")
    }
}

/// Mutable lifecycle fields, stored under the `meta` key of `plugin.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PluginMeta {
    #[serde(default)]
    pub status: PluginStatus,

    /// Set only alongside `Errored`/`Incompatible`; cleared on any
    /// successful transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    /// Boot wiring order. Values need not be contiguous; ties break by id.
    #[serde(default)]
    pub load_order: i64,

    /// Version string of a known-available update, set by update checks and
    /// cleared once the update has been applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_available: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

/// A single plugin's manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Stable identifier; must match the plugin's directory name.
    pub id: String,

    /// Display name.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Code namespace the runtime loader wires for this plugin.
    pub namespace: String,

    /// Plugin version (semver string).
    pub version: String,

    /// Minimum compatible panel version. Absent means no bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_version: Option<String>,

    /// When set, `panel_version` is an exact requirement instead of a floor.
    #[serde(default)]
    pub strict_panel_version: bool,

    /// Theme plugins gate UI registration.
    #[serde(default)]
    pub theme: bool,

    /// Language plugins merge their translations into the root namespace.
    #[serde(default)]
    pub language: bool,

    /// External package dependencies, in declaration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<PackageMap>,

    /// Seeder invoked as the last install step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeder: Option<String>,

    /// Service registrations resolved by the host at boot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<String>,

    /// Console commands contributed by the plugin.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,

    /// Where replacement bundles for this plugin are fetched from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_url: Option<String>,

    #[serde(default)]
    pub meta: PluginMeta,
}

impl PluginManifest {
    /// Load and parse a `plugin.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PluginError::InvalidBundle(format!("could not read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PluginError::InvalidBundle(format!("could not parse {}: {}", path.display(), e))
        })
    }

    /// Whether this plugin should be wired at boot and counted during
    /// dependency reconciliation. Errored plugins stay loadable so they are
    /// retried on the next boot.
    pub fn should_load(&self) -> bool {
        matches!(
            self.meta.status,
            PluginStatus::Enabled | PluginStatus::Errored
        )
    }

    /// Check the declared panel-version bound against the running panel.
    ///
    /// An absent or unparseable bound is treated as compatible, matching the
    /// permissive behavior users expect from hand-written manifests.
    pub fn is_compatible(&self, current: &semver::Version) -> bool {
        let Some(bound) = &self.panel_version else {
            return true;
        };
        let Ok(required) = semver::Version::parse(bound) else {
            return true;
        };
        if self.strict_panel_version {
            *current == required
        } else {
            *current >= required
        }
    }

    /// Human-readable message recorded when the compatibility check fails.
    pub fn compat_message(&self, current: &semver::Version) -> String {
        let bound = self.panel_version.as_deref().unwrap_or("?");
        let qualifier = if self.strict_panel_version {
            ""
        } else {
            " or newer"
        };
        format!(
            "This plugin is only compatible with panel version {bound}{qualifier} \
             but you are using version {current}!"
        )
    }
}

/// Read-merge-write the `meta` block of a `plugin.json` file.
///
/// The whole file is re-read, only `meta` is replaced, and the result is
/// written via a temporary file and rename so a crash can never leave a
/// half-written manifest. Returns the meta block as written.
pub fn update_meta(path: &Path, update: impl FnOnce(&mut PluginMeta)) -> Result<PluginMeta> {
    let content = fs::read_to_string(path)?;
    let mut document: Value = serde_json::from_str(&content)?;

    let mut meta: PluginMeta = document
        .get("meta")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();

    update(&mut meta);

    let Value::Object(map) = &mut document else {
        return Err(PluginError::InvalidBundle(format!(
            "{} is not a JSON object",
            path.display()
        )));
    };
    map.insert("meta".to_string(), serde_json::to_value(&meta)?);

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, &document)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path)
        .map_err(|e| PluginError::Io(e.error))?;

    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minimal_json() -> &'static str {
        r#"{
            "id": "pirate-language",
            "name": "Pirate Language",
            "namespace": "PirateLanguage",
            "version": "1.2.0"
        }"#
    }

    #[test]
    fn test_parse_minimal_manifest_defaults() {
        let manifest: PluginManifest = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(manifest.id, "pirate-language");
        assert_eq!(manifest.meta.status, PluginStatus::NotInstalled);
        assert_eq!(manifest.meta.load_order, 0);
        assert!(manifest.packages.is_none());
        assert!(!manifest.theme);
        assert!(!manifest.language);
        assert!(!manifest.strict_panel_version);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PluginStatus::NotInstalled).unwrap(),
            "\"not_installed\""
        );
        assert_eq!(
            serde_json::to_string(&PluginStatus::Enabled).unwrap(),
            "\"enabled\""
        );
    }

    #[test]
    fn test_should_load() {
        let mut manifest: PluginManifest = serde_json::from_str(minimal_json()).unwrap();
        assert!(!manifest.should_load());
        manifest.meta.status = PluginStatus::Enabled;
        assert!(manifest.should_load());
        manifest.meta.status = PluginStatus::Errored;
        assert!(manifest.should_load());
        manifest.meta.status = PluginStatus::Disabled;
        assert!(!manifest.should_load());
        manifest.meta.status = PluginStatus::Incompatible;
        assert!(!manifest.should_load());
    }

    #[test]
    fn test_compat_floor_bound() {
        let mut manifest: PluginManifest = serde_json::from_str(minimal_json()).unwrap();
        manifest.panel_version = Some("1.4.0".to_string());

        let current = semver::Version::parse("1.5.0").unwrap();
        assert!(manifest.is_compatible(&current));

        let older = semver::Version::parse("1.3.9").unwrap();
        assert!(!manifest.is_compatible(&older));
    }

    #[test]
    fn test_compat_strict_bound() {
        let mut manifest: PluginManifest = serde_json::from_str(minimal_json()).unwrap();
        manifest.panel_version = Some("1.4.0".to_string());
        manifest.strict_panel_version = true;

        assert!(manifest.is_compatible(&semver::Version::parse("1.4.0").unwrap()));
        assert!(!manifest.is_compatible(&semver::Version::parse("1.5.0").unwrap()));
    }

    #[test]
    fn test_compat_missing_bound_is_permissive() {
        let manifest: PluginManifest = serde_json::from_str(minimal_json()).unwrap();
        assert!(manifest.is_compatible(&semver::Version::parse("0.0.1").unwrap()));
    }

    #[test]
    fn test_compat_message_mentions_both_versions() {
        let mut manifest: PluginManifest = serde_json::from_str(minimal_json()).unwrap();
        manifest.panel_version = Some("9.9.9".to_string());
        let msg = manifest.compat_message(&semver::Version::parse("1.0.0").unwrap());
        assert!(msg.contains("9.9.9"));
        assert!(msg.contains("1.0.0"));
        assert!(msg.contains("or newer"));

        manifest.strict_panel_version = true;
        let msg = manifest.compat_message(&semver::Version::parse("1.0.0").unwrap());
        assert!(!msg.contains("or newer"));
    }

    #[test]
    fn test_update_meta_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plugin.json");
        fs::write(
            &path,
            r#"{
                "id": "demo",
                "name": "Demo",
                "namespace": "Demo",
                "version": "1.0.0",
                "custom_field": {"kept": true},
                "meta": {"status": "disabled", "load_order": 7}
            }"#,
        )
        .unwrap();

        let meta = update_meta(&path, |meta| {
            meta.status = PluginStatus::Enabled;
            meta.status_message = None;
        })
        .unwrap();
        assert_eq!(meta.status, PluginStatus::Enabled);
        assert_eq!(meta.load_order, 7);

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["custom_field"]["kept"], Value::Bool(true));
        assert_eq!(written["meta"]["status"], "enabled");
        assert_eq!(written["meta"]["load_order"], 7);
    }

    #[test]
    fn test_update_meta_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plugin.json");
        fs::write(
            &path,
            r#"{"id": "demo", "name": "Demo", "namespace": "Demo", "version": "1.0.0"}"#,
        )
        .unwrap();

        for _ in 0..2 {
            update_meta(&path, |meta| {
                meta.status = PluginStatus::Enabled;
                meta.status_message = None;
            })
            .unwrap();
        }

        let manifest = PluginManifest::load(&path).unwrap();
        assert_eq!(manifest.meta.status, PluginStatus::Enabled);
        assert!(manifest.meta.status_message.is_none());
    }

    #[test]
    fn test_packages_preserve_declaration_order() {
        let json = r#"{
            "id": "demo", "name": "Demo", "namespace": "Demo", "version": "1.0.0",
            "packages": {"vendor/zeta": "^2.0", "vendor/alpha": "^1.0"}
        }"#;
        let manifest: PluginManifest = serde_json::from_str(json).unwrap();
        let keys: Vec<&String> = manifest.packages.as_ref().unwrap().keys().collect();
        assert_eq!(keys, ["vendor/zeta", "vendor/alpha"]);
    }
}

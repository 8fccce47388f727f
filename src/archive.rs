//! Archive validation and extraction.
//!
//! Plugin bundles are zip archives from untrusted sources. Every entry path
//! is checked before anything is written: one bad entry rejects the whole
//! archive. The size ceiling is enforced on the archive itself before it is
//! opened, and again on cumulative decompressed bytes while extracting,
//! since the archive-size check alone does not stop high-ratio zip bombs.
//!
//! Destination rule: a bundle whose top level is already `<name>/plugin.json`
//! extracts into the plugins root as-is; anything else extracts into
//! `plugins_root/<name>`. Sources normalize their top-level layout
//! differently and getting this wrong double-nests or flattens the plugin.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::config::{Settings, MAX_DECOMPRESSION_RATIO};
use crate::error::{PluginError, Result};
use crate::PLUGIN_MANIFEST;

/// Validate `archive` and extract it as plugin `name` under the plugins
/// root. With `clean` set, any pre-existing directory for the same plugin is
/// deleted first (update flows use this to guarantee no stale files
/// survive).
///
/// Returns the plugin's directory.
pub fn extract_bundle(
    settings: &Settings,
    archive: &Path,
    name: &str,
    clean: bool,
) -> Result<PathBuf> {
    let archive_len = fs::metadata(archive)?.len();
    if archive_len > settings.max_import_size {
        return Err(PluginError::InvalidBundle(format!(
            "archive is {} bytes, limit is {} bytes",
            archive_len, settings.max_import_size
        )));
    }

    let file = fs::File::open(archive)?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| PluginError::InvalidBundle(format!("could not open zip archive: {e}")))?;

    // All entries are validated before a single one is extracted.
    let mut declared_total: u64 = 0;
    for i in 0..zip.len() {
        let entry = zip.by_index_raw(i)?;
        validate_entry_path(entry.name())?;
        declared_total = declared_total.saturating_add(entry.size());
    }

    let budget = settings
        .max_import_size
        .saturating_mul(MAX_DECOMPRESSION_RATIO);
    if declared_total > budget {
        return Err(PluginError::InvalidBundle(format!(
            "archive would decompress to {declared_total} bytes, limit is {budget} bytes"
        )));
    }

    let nested_manifest = format!("{name}/{PLUGIN_MANIFEST}");
    let already_nested = zip.file_names().any(|n| n == nested_manifest);
    let dest = if already_nested {
        settings.plugins_root.clone()
    } else {
        settings.plugin_dir(name)
    };

    let plugin_dir = settings.plugin_dir(name);
    if clean && plugin_dir.exists() {
        log::debug!("clean download: removing {:?}", plugin_dir);
        fs::remove_dir_all(&plugin_dir)?;
    }

    let created_fresh = !plugin_dir.exists();
    fs::create_dir_all(&dest)?;

    let result = extract_entries(&mut zip, &dest, budget);
    if result.is_err() && created_fresh && plugin_dir.exists() {
        let _ = fs::remove_dir_all(&plugin_dir);
    }
    result?;

    if !plugin_dir.join(PLUGIN_MANIFEST).exists() {
        if created_fresh {
            let _ = fs::remove_dir_all(&plugin_dir);
        }
        return Err(PluginError::InvalidBundle(format!(
            "bundle for '{name}' does not contain {PLUGIN_MANIFEST}"
        )));
    }

    log::debug!("extracted plugin '{}' to {:?}", name, plugin_dir);
    Ok(plugin_dir)
}

fn extract_entries(
    zip: &mut ZipArchive<fs::File>,
    dest: &Path,
    budget: u64,
) -> Result<()> {
    let mut remaining = budget;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(PluginError::InvalidBundle(format!(
                "archive entry '{}' uses an invalid path",
                entry.name()
            )));
        };
        let out_path = dest.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = fs::File::create(&out_path)?;
        // Cap actual decompressed bytes; declared sizes can lie.
        let copied = std::io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)?;
        if copied > remaining {
            return Err(PluginError::InvalidBundle(
                "archive exceeded the decompressed size limit during extraction".to_string(),
            ));
        }
        remaining -= copied;
    }

    Ok(())
}

/// Reject parent-directory traversal segments and absolute paths.
fn validate_entry_path(name: &str) -> Result<()> {
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(PluginError::InvalidBundle(format!(
            "archive entry '{name}' is an absolute path"
        )));
    }
    if name.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(PluginError::InvalidBundle(format!(
            "archive entry '{name}' contains a path traversal sequence"
        )));
    }
    Ok(())
}

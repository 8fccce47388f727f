//! Archive Fetcher - turns any accepted plugin source into a local archive.
//!
//! Three source shapes are accepted and all converge on the same validated
//! zip file handed to the extractor:
//!
//! 1. An uploaded archive already on local disk (passed through)
//! 2. A direct HTTP(S) URL to a zip archive
//! 3. A GitHub "browse folder" URL (`.../tree/<branch>/<path>`), resolved
//!    through the contents-listing API and reassembled into a synthetic zip
//!
//! Inputs are untrusted. Downloads are streamed against a cumulative byte
//! counter and aborted the instant the configured ceiling is exceeded -
//! nothing is buffered whole before the size check.

pub mod github;

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::{PluginError, Result};

use github::{GitHubBrowser, RepoBrowser, TreeUrl};

/// Where a plugin bundle comes from.
#[derive(Debug, Clone)]
pub enum PluginSource {
    /// An uploaded archive already materialized on local storage.
    Archive(PathBuf),

    /// A direct archive URL or a GitHub folder reference.
    Url(String),
}

/// A fetched, locally materialized plugin archive.
///
/// Holds its staging directory alive; dropping the bundle discards any
/// temporary download artifacts.
#[derive(Debug)]
pub struct FetchedBundle {
    /// Plugin name derived from the source (file name or folder name).
    pub name: String,

    /// Path of the local zip archive.
    pub archive: PathBuf,

    _staging: Option<tempfile::TempDir>,
}

/// Retrieves plugin bundles from uploads, URLs and repository folders.
pub struct Fetcher<'a> {
    settings: &'a Settings,
    client: reqwest::blocking::Client,
    browser: Box<dyn RepoBrowser>,
}

impl<'a> Fetcher<'a> {
    pub fn new(settings: &'a Settings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.download_timeout())
            .build()?;
        let browser = GitHubBrowser::new(settings)?;
        Ok(Self {
            settings,
            client,
            browser: Box::new(browser),
        })
    }

    /// Create a fetcher with an explicit repository browser (for testing).
    pub fn with_browser(settings: &'a Settings, browser: Box<dyn RepoBrowser>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.download_timeout())
            .build()?;
        Ok(Self {
            settings,
            client,
            browser,
        })
    }

    /// Materialize `source` as a validated local archive.
    pub fn fetch(&self, source: &PluginSource) -> Result<FetchedBundle> {
        match source {
            PluginSource::Archive(path) => self.fetch_local(path),
            PluginSource::Url(url) => {
                if let Some(tree) = TreeUrl::parse(url) {
                    github::download_folder(self.settings, self.browser.as_ref(), &tree)
                } else {
                    self.fetch_url(url)
                }
            }
        }
    }

    fn fetch_local(&self, path: &Path) -> Result<FetchedBundle> {
        if !path.is_file() {
            return Err(PluginError::FetchFailed(format!(
                "uploaded archive {} does not exist",
                path.display()
            )));
        }
        let name = archive_plugin_name(&path.to_string_lossy())?;
        Ok(FetchedBundle {
            name,
            archive: path.to_path_buf(),
            _staging: None,
        })
    }

    fn fetch_url(&self, url: &str) -> Result<FetchedBundle> {
        let name = archive_plugin_name(url)?;
        log::debug!("downloading plugin '{}' from {}", name, url);

        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(PluginError::FetchFailed(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let staging = tempfile::TempDir::new()?;
        let archive = staging.path().join(format!("{name}.zip"));
        copy_with_limit(response, &archive, self.settings.max_import_size)?;

        Ok(FetchedBundle {
            name,
            archive,
            _staging: Some(staging),
        })
    }
}

/// Stream `reader` into `dest`, aborting the moment the cumulative byte
/// count exceeds `limit`. The hostile case is a response body much larger
/// than its Content-Length claims, so the counter is authoritative, not the
/// header.
fn copy_with_limit(mut reader: impl Read, dest: &Path, limit: u64) -> Result<()> {
    let mut out = fs::File::create(dest)?;
    let mut buf = [0u8; 64 * 1024];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > limit {
            return Err(PluginError::FetchFailed(format!(
                "download exceeded the maximum allowed size of {limit} bytes"
            )));
        }
        out.write_all(&buf[..n])?;
    }

    Ok(())
}

/// Derive the plugin name from an archive file name or URL: the final path
/// segment without its `.zip` extension.
fn archive_plugin_name(source: &str) -> Result<String> {
    let basename = source
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");
    let name = basename.strip_suffix(".zip").unwrap_or(basename);

    if name.is_empty()
        || name.starts_with('.')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(PluginError::FetchFailed(format!(
            "cannot derive a valid plugin name from '{source}'"
        )));
    }

    Ok(name.to_string())
}

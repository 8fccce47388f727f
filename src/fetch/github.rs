//! GitHub folder references.
//!
//! A plugin can be installed straight from a repository folder URL of the
//! form `https://github.com/<owner>/<repo>/tree/<branch>/<path>`. The folder
//! is mirrored file by file through the contents-listing API, then
//! reassembled into a synthetic zip whose top-level directory is the plugin
//! name, so the rest of the pipeline sees an ordinary bundle.
//!
//! The walk is an iterative worklist with an explicit depth bound and a
//! shared running byte total checked before every write. Every discovered
//! download URL must point at the raw-content host - an allow-list check,
//! not a pattern match on the browse URL.

use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use zip::write::SimpleFileOptions;

use crate::config::{Settings, MAX_TREE_DEPTH};
use crate::error::{PluginError, Result};

use super::FetchedBundle;

/// Allowed origin for every file download discovered through the listing
/// API.
pub const RAW_CONTENT_PREFIX: &str = "https://raw.githubusercontent.com/";

const LISTING_API_BASE: &str = "https://api.github.com";

/// A parsed `tree` (browse-folder) URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeUrl {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub path: String,
}

impl TreeUrl {
    /// Parse `https?://github.com/<owner>/<repo>/tree/<branch>/<path>`.
    /// Returns `None` for anything else (direct zip URLs, blob URLs, ...).
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))?;
        let rest = rest.strip_prefix("github.com/")?;

        let mut parts = rest.splitn(4, '/');
        let owner = parts.next()?;
        let repo = parts.next()?;
        if parts.next()? != "tree" {
            return None;
        }
        let branch_and_path = parts.next()?;
        let (branch, path) = branch_and_path.split_once('/')?;

        if owner.is_empty() || repo.is_empty() || branch.is_empty() || path.is_empty() {
            return None;
        }

        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            path: path.to_string(),
        })
    }

    /// The plugin name: the last segment of the referenced folder.
    pub fn plugin_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone)]
pub struct RepoEntry {
    pub name: String,
    /// Repository-relative path, used to list subdirectories.
    pub path: String,
    pub kind: RepoEntryKind,
}

#[derive(Debug, Clone)]
pub enum RepoEntryKind {
    File { download_url: Option<String> },
    Dir,
}

/// Remote directory access, split out so the folder walk can be exercised
/// without the network.
pub trait RepoBrowser {
    /// List one directory of the referenced tree.
    fn list_dir(&self, tree: &TreeUrl, path: &str) -> Result<Vec<RepoEntry>>;

    /// Download one file, failing if its content exceeds `limit` bytes.
    fn fetch_file(&self, download_url: &str, limit: u64) -> Result<Vec<u8>>;
}

/// `RepoBrowser` backed by the GitHub contents API.
pub struct GitHubBrowser {
    client: reqwest::blocking::Client,
}

impl GitHubBrowser {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.api_timeout())
            .user_agent("mast-panel")
            .build()?;
        Ok(Self { client })
    }
}

impl RepoBrowser for GitHubBrowser {
    fn list_dir(&self, tree: &TreeUrl, path: &str) -> Result<Vec<RepoEntry>> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            LISTING_API_BASE, tree.owner, tree.repo, path, tree.branch
        );
        log::debug!("listing remote folder: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .send()?;
        if !response.status().is_success() {
            return Err(PluginError::FetchFailed(format!(
                "HTTP {} from listing API for '{}'",
                response.status(),
                path
            )));
        }

        let Value::Array(items) = response.json()? else {
            return Err(PluginError::FetchFailed(
                "unexpected response from the listing API".to_string(),
            ));
        };

        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    PluginError::FetchFailed("listing entry has no name".to_string())
                })?
                .to_string();
            let entry_path = item
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let kind = match item.get("type").and_then(Value::as_str) {
                Some("file") => RepoEntryKind::File {
                    download_url: item
                        .get("download_url")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                },
                Some("dir") => RepoEntryKind::Dir,
                other => {
                    // Submodules and symlinks have no place in a plugin bundle.
                    log::warn!("ignoring listing entry '{}' of type {:?}", name, other);
                    continue;
                }
            };
            entries.push(RepoEntry {
                name,
                path: entry_path,
                kind,
            });
        }

        Ok(entries)
    }

    fn fetch_file(&self, download_url: &str, limit: u64) -> Result<Vec<u8>> {
        let response = self.client.get(download_url).send()?;
        if !response.status().is_success() {
            return Err(PluginError::FetchFailed(format!(
                "HTTP {} from {}",
                response.status(),
                download_url
            )));
        }

        read_capped(response, limit)
    }
}

/// Read a whole response body, failing once it exceeds `limit` bytes.
fn read_capped(reader: impl Read, limit: u64) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let copied = reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(PluginError::Io)?;
    if copied as u64 > limit {
        return Err(PluginError::FetchFailed(format!(
            "cumulative download exceeded the maximum allowed size of {limit} bytes"
        )));
    }
    Ok(bytes)
}

/// Mirror the referenced folder into temporary storage and reassemble it as
/// a zip bundle named after the folder.
///
/// Partial downloads live inside a delete-on-drop staging directory, so an
/// abort (size ceiling, depth bound, bad entry) discards everything already
/// written.
pub fn download_folder(
    settings: &Settings,
    browser: &dyn RepoBrowser,
    tree: &TreeUrl,
) -> Result<FetchedBundle> {
    let name = tree.plugin_name().to_string();
    super::archive_plugin_name(&format!("{name}.zip"))?;

    let staging = tempfile::TempDir::new()?;
    let mirror_root = staging.path().join(&name);
    fs::create_dir_all(&mirror_root)?;

    let max = settings.max_import_size;
    let mut total: u64 = 0;

    let mut worklist: VecDeque<(String, PathBuf, usize)> = VecDeque::new();
    worklist.push_back((tree.path.clone(), mirror_root.clone(), 0));

    while let Some((remote_path, local_dir, depth)) = worklist.pop_front() {
        if depth > MAX_TREE_DEPTH {
            return Err(PluginError::FetchFailed(format!(
                "remote folder nesting exceeds {MAX_TREE_DEPTH} levels"
            )));
        }

        for entry in browser.list_dir(tree, &remote_path)? {
            validate_listing_name(&entry.name)?;
            let local_path = local_dir.join(&entry.name);

            match entry.kind {
                RepoEntryKind::File { download_url } => {
                    let url = download_url.ok_or_else(|| {
                        PluginError::FetchFailed(format!(
                            "listing entry '{}' has no download URL",
                            entry.name
                        ))
                    })?;
                    if !url.starts_with(RAW_CONTENT_PREFIX) {
                        return Err(PluginError::FetchFailed(format!(
                            "download URL for '{}' is not from the allowed content host",
                            entry.name
                        )));
                    }

                    // Budget is checked inside the download: the walk stops
                    // mid-file, before the next file is even requested.
                    let remaining = max.saturating_sub(total);
                    let bytes = browser.fetch_file(&url, remaining)?;
                    total += bytes.len() as u64;
                    fs::write(&local_path, bytes)?;
                }
                RepoEntryKind::Dir => {
                    if entry.path.is_empty() {
                        return Err(PluginError::FetchFailed(format!(
                            "listing entry '{}' has no path",
                            entry.name
                        )));
                    }
                    fs::create_dir_all(&local_path)?;
                    worklist.push_back((entry.path, local_path, depth + 1));
                }
            }
        }
    }

    let archive = staging.path().join(format!("{name}.zip"));
    assemble_zip(&mirror_root, &name, &archive)?;

    log::debug!(
        "assembled plugin '{}' from remote folder ({} bytes)",
        name,
        total
    );

    Ok(FetchedBundle {
        name,
        archive,
        _staging: Some(staging),
    })
}

/// Listing entries come from a remote API and are treated as hostile: plain
/// file names only.
fn validate_listing_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(PluginError::FetchFailed(format!(
            "listing contains an invalid entry name '{name}'"
        )));
    }
    Ok(())
}

/// Zip the mirrored folder with every file under a `<name>/` top directory,
/// the layout the extractor recognizes as already nested.
fn assemble_zip(mirror_root: &Path, name: &str, dest: &Path) -> Result<()> {
    let file = fs::File::create(dest)?;
    let mut writer = zip::ZipWriter::new(file);
    add_dir(&mut writer, mirror_root, name)?;
    writer.finish()?;
    Ok(())
}

fn add_dir(
    writer: &mut zip::ZipWriter<fs::File>,
    dir: &Path,
    prefix: &str,
) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let child = format!("{}/{}", prefix, entry.file_name().to_string_lossy());

        if path.is_dir() {
            writer.add_directory(&child, SimpleFileOptions::default())?;
            add_dir(writer, &path, &child)?;
        } else {
            writer.start_file(&child, SimpleFileOptions::default())?;
            let mut source = fs::File::open(&path)?;
            let mut buf = Vec::new();
            source.read_to_end(&mut buf)?;
            writer.write_all(&buf)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use zip::ZipArchive;

    // ========================================================================
    // Tree URL parsing
    // ========================================================================

    #[test]
    fn test_tree_url_valid() {
        let tree =
            TreeUrl::parse("https://github.com/acme/plugins/tree/main/pirate-language").unwrap();
        assert_eq!(tree.owner, "acme");
        assert_eq!(tree.repo, "plugins");
        assert_eq!(tree.branch, "main");
        assert_eq!(tree.path, "pirate-language");
        assert_eq!(tree.plugin_name(), "pirate-language");

        assert!(TreeUrl::parse("http://github.com/user/repo/tree/develop/folder").is_some());
    }

    #[test]
    fn test_tree_url_branch_is_first_segment() {
        // Mirrors the reference behavior: branch is a single segment, the
        // rest belongs to the path.
        let tree =
            TreeUrl::parse("https://github.com/owner/repo/tree/feature/branch/path/to/plugin")
                .unwrap();
        assert_eq!(tree.branch, "feature");
        assert_eq!(tree.path, "branch/path/to/plugin");
        assert_eq!(tree.plugin_name(), "plugin");
    }

    #[test]
    fn test_tree_url_invalid() {
        assert!(TreeUrl::parse("https://example.com/plugin.zip").is_none());
        assert!(TreeUrl::parse("https://github.com/owner/repo/blob/main/file.rs").is_none());
        assert!(TreeUrl::parse("https://github.com/owner/repo").is_none());
        assert!(TreeUrl::parse("https://github.com/owner/repo/tree/main").is_none());
        assert!(TreeUrl::parse("not-a-url").is_none());
    }

    // ========================================================================
    // Capped reads
    // ========================================================================

    #[test]
    fn test_read_capped_rejects_oversize_body() {
        let payload = vec![0u8; 2048];
        let err = read_capped(&payload[..], 1024).unwrap_err();
        assert!(matches!(err, PluginError::FetchFailed(_)));
    }

    #[test]
    fn test_read_capped_handles_unbounded_limit() {
        // An operator-configured ceiling of u64::MAX must not overflow.
        let payload = vec![7u8; 1024];
        let bytes = read_capped(&payload[..], u64::MAX).unwrap();
        assert_eq!(bytes.len(), 1024);
    }

    // ========================================================================
    // Folder walk
    // ========================================================================

    struct MockBrowser {
        listings: HashMap<String, Vec<RepoEntry>>,
        files: HashMap<String, Vec<u8>>,
        fetched: RefCell<Vec<String>>,
    }

    impl MockBrowser {
        fn new() -> Self {
            Self {
                listings: HashMap::new(),
                files: HashMap::new(),
                fetched: RefCell::new(Vec::new()),
            }
        }

        fn file(mut self, dir: &str, name: &str, content: &[u8]) -> Self {
            let url = format!("{RAW_CONTENT_PREFIX}acme/plugins/main/{dir}/{name}");
            self.listings.entry(dir.to_string()).or_default().push(RepoEntry {
                name: name.to_string(),
                path: format!("{dir}/{name}"),
                kind: RepoEntryKind::File {
                    download_url: Some(url.clone()),
                },
            });
            self.files.insert(url, content.to_vec());
            self
        }

        fn dir(mut self, parent: &str, name: &str) -> Self {
            let path = format!("{parent}/{name}");
            self.listings
                .entry(parent.to_string())
                .or_default()
                .push(RepoEntry {
                    name: name.to_string(),
                    path: path.clone(),
                    kind: RepoEntryKind::Dir,
                });
            self.listings.entry(path).or_default();
            self
        }
    }

    impl RepoBrowser for MockBrowser {
        fn list_dir(&self, _tree: &TreeUrl, path: &str) -> Result<Vec<RepoEntry>> {
            self.listings
                .get(path)
                .cloned()
                .ok_or_else(|| PluginError::FetchFailed(format!("no such path '{path}'")))
        }

        fn fetch_file(&self, download_url: &str, limit: u64) -> Result<Vec<u8>> {
            self.fetched.borrow_mut().push(download_url.to_string());
            let bytes = self
                .files
                .get(download_url)
                .cloned()
                .ok_or_else(|| PluginError::FetchFailed("404".to_string()))?;
            if bytes.len() as u64 > limit {
                return Err(PluginError::FetchFailed(format!(
                    "cumulative download exceeded the maximum allowed size of {limit} bytes"
                )));
            }
            Ok(bytes)
        }
    }

    fn demo_tree() -> TreeUrl {
        TreeUrl::parse("https://github.com/acme/plugins/tree/main/demo").unwrap()
    }

    fn small_settings(tmp: &Path, max_import_size: u64) -> Settings {
        let mut settings = Settings::new(tmp, "1.0.0").unwrap();
        settings.max_import_size = max_import_size;
        settings
    }

    #[test]
    fn test_walk_assembles_nested_zip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = small_settings(tmp.path(), 1024 * 1024);
        let browser = MockBrowser::new()
            .file("demo", "plugin.json", b"{}")
            .dir("demo", "src")
            .file("demo/src", "module.rs", b"// code");

        let bundle = download_folder(&settings, &browser, &demo_tree()).unwrap();
        assert_eq!(bundle.name, "demo");

        let mut zip =
            ZipArchive::new(fs::File::open(&bundle.archive).unwrap()).unwrap();
        let names: Vec<String> = zip.file_names().map(str::to_string).collect();
        assert!(names.contains(&"demo/plugin.json".to_string()));
        assert!(names.contains(&"demo/src/module.rs".to_string()));
        // Zip entries confirm top-level nesting under the plugin name.
        let mut manifest = String::new();
        zip.by_name("demo/plugin.json")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        assert_eq!(manifest, "{}");
    }

    #[test]
    fn test_walk_aborts_on_cumulative_size() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = small_settings(tmp.path(), 100);
        let browser = MockBrowser::new()
            .file("demo", "a.bin", &[0u8; 60])
            .file("demo", "b.bin", &[0u8; 60])
            .file("demo", "c.bin", &[0u8; 60]);

        let err = download_folder(&settings, &browser, &demo_tree()).unwrap_err();
        assert!(matches!(err, PluginError::FetchFailed(_)));

        // The abort happened while fetching the second file; the third was
        // never requested.
        let fetched = browser.fetched.borrow();
        assert_eq!(fetched.len(), 2);
        assert!(fetched[1].ends_with("b.bin"));
    }

    #[test]
    fn test_walk_rejects_disallowed_download_host() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = small_settings(tmp.path(), 1024);
        let mut browser = MockBrowser::new();
        browser.listings.insert(
            "demo".to_string(),
            vec![RepoEntry {
                name: "evil.bin".to_string(),
                path: "demo/evil.bin".to_string(),
                kind: RepoEntryKind::File {
                    download_url: Some("https://evil.example.com/payload".to_string()),
                },
            }],
        );

        let err = download_folder(&settings, &browser, &demo_tree()).unwrap_err();
        assert!(err.to_string().contains("allowed content host"));
        assert!(browser.fetched.borrow().is_empty());
    }

    #[test]
    fn test_walk_rejects_traversal_entry_names() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = small_settings(tmp.path(), 1024);
        let mut browser = MockBrowser::new();
        browser.listings.insert(
            "demo".to_string(),
            vec![RepoEntry {
                name: "..".to_string(),
                path: "demo/..".to_string(),
                kind: RepoEntryKind::Dir,
            }],
        );

        let err = download_folder(&settings, &browser, &demo_tree()).unwrap_err();
        assert!(matches!(err, PluginError::FetchFailed(_)));
    }

    #[test]
    fn test_walk_enforces_depth_bound() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = small_settings(tmp.path(), 1024 * 1024);

        let mut browser = MockBrowser::new();
        let mut parent = "demo".to_string();
        for i in 0..=MAX_TREE_DEPTH {
            browser = browser.dir(&parent, &format!("d{i}"));
            parent = format!("{parent}/d{i}");
        }

        let err = download_folder(&settings, &browser, &demo_tree()).unwrap_err();
        assert!(err.to_string().contains("nesting"));
    }
}

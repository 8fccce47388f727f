//! Unified error handling for the plugin subsystem.
//!
//! Every collaborator (fetcher, archive validation, package manager,
//! migration runner, seeder, asset builder) reports failure through this one
//! taxonomy so the lifecycle orchestrator never has to know which external
//! tool produced an error.

use thiserror::Error;

/// Main error type for plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Archive cannot be opened, fails size or path validation, or is
    /// missing required metadata.
    #[error("invalid plugin bundle: {0}")]
    InvalidBundle(String),

    /// Network error, disallowed host, malformed source reference, or
    /// cumulative size exceeded while assembling a remote folder.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Reserved for a future strict reconciliation mode. The current policy
    /// resolves conflicting constraints last-writer-wins and only logs.
    #[error("conflicting constraints for package '{package}': '{kept}' would replace '{dropped}'")]
    DependencyConflict {
        package: String,
        kept: String,
        dropped: String,
    },

    /// Batched package-manager invocation returned non-zero. Carries the
    /// tool's error output verbatim.
    #[error("package manager failed: {0}")]
    PackageManager(String),

    /// Migration runner reported failure.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Seeder reported failure.
    #[error("seeding failed: {0}")]
    Seed(String),

    /// Front-end asset install or build step failed.
    #[error("asset build failed: {0}")]
    AssetBuild(String),

    /// No registry record for the given plugin id.
    #[error("plugin '{0}' is not registered")]
    UnknownPlugin(String),

    /// The plugin's declared panel-version bound does not match the running
    /// panel.
    #[error("{0}")]
    Incompatible(String),

    /// A bounded external invocation exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// I/O related errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse or serialize errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Version string could not be parsed.
    #[error("invalid version: {0}")]
    Version(#[from] semver::Error),
}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        PluginError::FetchFailed(err.to_string())
    }
}

impl From<zip::result::ZipError> for PluginError {
    fn from(err: zip::result::ZipError) -> Self {
        PluginError::InvalidBundle(err.to_string())
    }
}

/// Convenience type alias for Results using PluginError.
pub type Result<T> = std::result::Result<T, PluginError>;

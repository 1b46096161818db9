//! Error types for sklib-core

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while loading tool configuration or resolving the project.
///
/// All of these are pre-flight failures: nothing on the remote has been
/// touched when one is returned.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error("invalid configuration: {0}")]
    Deserialize(#[from] Box<figment::Error>),

    /// Configuration file not found after searching all locations.
    #[error("no configuration file found")]
    NotFound,

    /// The project manifest could not be read.
    #[error("error while reading {path}: {source}")]
    ManifestRead {
        /// Manifest location.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The project manifest is not valid JSON.
    #[error("error while parsing {path}: {source}")]
    ManifestParse {
        /// Manifest location.
        path: Utf8PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// No owner/name pair could be derived for the project repository.
    #[error(
        "please supply a github.com repository URL with --repo-url or in the \"repository\" field of package.json"
    )]
    MissingRepository,

    /// A repository URL was supplied but does not name an owner/name pair.
    #[error("`{0}` is not a GitHub repository URL")]
    InvalidRepository(String),

    /// A required manifest field is absent.
    #[error("package.json is missing the `{0}` field")]
    MissingField(&'static str),

    /// Release creation is skipped but nothing says where the download lives.
    #[error("--download-url is required when --skip-release is set")]
    DownloadUrlRequired,
}

/// Result type alias using [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;

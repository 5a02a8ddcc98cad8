use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// No asset of the release matched the configured file name pattern.
    #[error("no asset of release {tag} matches the package name pattern")]
    AssetNotFound { tag: String },

    #[error("invalid repository {0:?}, expected owner/name")]
    InvalidRepo(String),

    #[error("invalid GitHub API base URL {0:?}")]
    InvalidApi(String),

    #[error("invalid package name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("no published release found")]
    NoRelease,

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to write asset {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FetchError {
    pub fn is_asset_not_found(&self) -> bool {
        matches!(self, FetchError::AssetNotFound { .. })
    }
}

//! The release fetcher contract consumed by the rollout coordinator.

use std::path::PathBuf;

use async_trait::async_trait;

use shepherd_core::ReleaseTag;

use crate::error::FetchError;

/// A release resolved to a concrete tag and a local asset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub tag: ReleaseTag,
    pub path: PathBuf,
}

#[async_trait]
pub trait ReleaseFetcher: Send + Sync {
    /// Resolve `tag` and make its matching asset available locally.
    ///
    /// `tag == "latest"` resolves the newest release. An asset already
    /// present at the expected path is reused without downloading.
    async fn download_release_asset(&self, tag: &str) -> Result<ResolvedAsset, FetchError>;
}

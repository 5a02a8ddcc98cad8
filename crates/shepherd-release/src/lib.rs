//! shepherd-release — release asset resolution.
//!
//! A [`ReleaseFetcher`] turns a tag (or the `latest` sentinel) into a
//! concrete tag plus a local asset file the deploy scripts can consume.
//! [`GitHubFetcher`] implements it against the GitHub REST API.

pub mod error;
pub mod fetcher;
pub mod github;

pub use error::FetchError;
pub use fetcher::{ReleaseFetcher, ResolvedAsset};
pub use github::GitHubFetcher;

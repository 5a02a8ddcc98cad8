//! GitHub releases backend.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use shepherd_core::{ShepherdConfig, is_latest};

use crate::error::FetchError;
use crate::fetcher::{ReleaseFetcher, ResolvedAsset};

const GITHUB_JSON: &str = "application/vnd.github+json";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    /// RFC 3339; lexical order is chronological.
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
struct Asset {
    id: u64,
    name: String,
}

/// [`ReleaseFetcher`] backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubFetcher {
    client: reqwest::Client,
    api: Url,
    owner: String,
    repo: String,
    pattern: Regex,
    download_dir: PathBuf,
    include_prereleases: bool,
}

impl GitHubFetcher {
    pub fn new(
        api: &str,
        repo: &str,
        token: &str,
        pattern: &str,
        download_dir: &Path,
        include_prereleases: bool,
    ) -> Result<Self, FetchError> {
        let (owner, name) = repo
            .split_once('/')
            .filter(|(o, n)| !o.is_empty() && !n.is_empty())
            .ok_or_else(|| FetchError::InvalidRepo(repo.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("shepherd"));
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| FetchError::InvalidRepo(repo.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder().default_headers(headers).build()?;
        let api = Url::parse(api)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| FetchError::InvalidApi(api.to_string()))?;

        Ok(Self {
            client,
            api,
            owner: owner.to_string(),
            repo: name.to_string(),
            pattern: Regex::new(pattern)?,
            download_dir: download_dir.to_path_buf(),
            include_prereleases,
        })
    }

    pub fn from_config(config: &ShepherdConfig) -> Result<Self, FetchError> {
        Self::new(
            &config.github_api,
            &config.repo,
            &config.github_token,
            &config.package_name_pattern,
            &config.assets_download_path,
            config.include_prereleases,
        )
    }

    /// `<api>/repos/<owner>/<repo>/<segments...>`, each segment encoded.
    fn repo_url(&self, segments: &[&str]) -> String {
        let mut url = self.api.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["repos", self.owner.as_str(), self.repo.as_str()])
                .extend(segments);
        }
        url.to_string()
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let resp = self.client.get(url).header(ACCEPT, GITHUB_JSON).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp.json().await?)
    }

    async fn resolve_release(&self, tag: &str) -> Result<Release, FetchError> {
        if !is_latest(tag) {
            return self.get_json(&self.repo_url(&["releases", "tags", tag])).await;
        }
        if !self.include_prereleases {
            return self.get_json(&self.repo_url(&["releases", "latest"])).await;
        }
        // The list endpoint includes pre-releases; take the newest published.
        let releases: Vec<Release> = self.get_json(&self.repo_url(&["releases"])).await?;
        releases
            .into_iter()
            .filter(|r| !r.draft)
            .max_by(|a, b| a.published_at.cmp(&b.published_at))
            .ok_or(FetchError::NoRelease)
    }

    async fn download(&self, asset: &Asset, dest: &Path) -> Result<(), FetchError> {
        let id = asset.id.to_string();
        let url = self.repo_url(&["releases", "assets", &id]);
        let resp = self.client.get(&url).header(ACCEPT, OCTET_STREAM).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }
        let body = resp.bytes().await?;

        let io_err = |source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(&self.download_dir).await.map_err(io_err)?;
        // Write beside the target and rename so a crash never leaves a
        // truncated file that would later be reused.
        let partial = partial_path(dest);
        tokio::fs::write(&partial, &body).await.map_err(io_err)?;
        tokio::fs::rename(&partial, dest).await.map_err(io_err)?;
        Ok(())
    }
}

/// `dest` with `.partial` appended to the full file name.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

#[async_trait]
impl ReleaseFetcher for GitHubFetcher {
    async fn download_release_asset(&self, tag: &str) -> Result<ResolvedAsset, FetchError> {
        let release = self.resolve_release(tag).await?;
        info!(
            requested = %tag,
            tag = %release.tag_name,
            prerelease = release.prerelease,
            "release resolved"
        );

        let Some(asset) = release.assets.iter().find(|a| {
            debug!(name = %a.name, id = a.id, "asset candidate");
            self.pattern.is_match(&a.name)
        }) else {
            return Err(FetchError::AssetNotFound {
                tag: release.tag_name,
            });
        };

        let path = self.download_dir.join(&asset.name);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => {
                debug!(?path, "reusing downloaded asset");
            }
            Ok(false) => {
                self.download(asset, &path).await?;
                info!(tag = %release.tag_name, ?path, "asset downloaded");
            }
            Err(source) => return Err(FetchError::Io { path, source }),
        }

        Ok(ResolvedAsset {
            tag: release.tag_name,
            path,
        })
    }
}

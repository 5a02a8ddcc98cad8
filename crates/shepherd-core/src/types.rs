//! Shared types used across shepherd crates.

use serde::{Deserialize, Serialize};

/// Opaque identifier of a release (a git tag on the artifact host).
pub type ReleaseTag = String;

/// Sentinel tag meaning "resolve the newest available release".
pub const LATEST_TAG: &str = "latest";

/// Whether `tag` is the [`LATEST_TAG`] sentinel rather than a literal tag.
pub fn is_latest(tag: &str) -> bool {
    tag == LATEST_TAG
}

/// The two distributed locks a host can contend for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockName {
    /// Held by the single host currently canarying the newest release.
    Canary,
    /// Held by the host currently propagating the stable tag.
    Rollout,
}

impl LockName {
    /// Key suffix under the repository namespace.
    pub fn key_suffix(self) -> &'static str {
        match self {
            LockName::Canary => "canary_release_tag",
            LockName::Rollout => "rollout",
        }
    }
}

impl std::fmt::Display for LockName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockName::Canary => f.write_str("canary-lock"),
            LockName::Rollout => f.write_str("rollout-lock"),
        }
    }
}

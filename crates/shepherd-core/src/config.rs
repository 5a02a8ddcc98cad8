//! shepherd.toml configuration parser.
//!
//! The configuration is loaded once at startup, validated, and then handed
//! to every component as an immutable value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::{format_duration, serde_opt_str, serde_str};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required option: {0}")]
    Missing(&'static str),

    #[error("invalid option {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShepherdConfig {
    /// Repository in `owner/name` form; also the default key namespace.
    pub repo: String,
    pub github_token: String,
    pub github_api: String,
    /// Consider pre-releases when resolving `latest`.
    pub include_prereleases: bool,
    pub assets_download_path: PathBuf,
    /// Regex an asset file name must match to be selected.
    pub package_name_pattern: String,

    pub deploy_command: String,
    pub rollback_command: String,
    pub healthcheck_command: String,
    pub healthcheck_retries: u32,
    #[serde(with = "serde_str")]
    pub healthcheck_interval: Duration,
    #[serde(with = "serde_str")]
    pub healthcheck_timeout: Duration,

    #[serde(with = "serde_str")]
    pub canary_rollout_window: Duration,
    #[serde(with = "serde_str")]
    pub rollout_window: Duration,
    #[serde(with = "serde_str")]
    pub repository_polling_interval: Duration,

    pub state_file_path: PathBuf,
    /// When set, the running version is queried with this command instead
    /// of being read from `state_file_path`.
    pub version_command: Option<String>,

    /// Run each loop once and exit.
    pub once: bool,
    pub log_level: String,
    pub alert_webhook_url: Option<String>,
    pub alert_channel: Option<String>,

    pub redis: RedisConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    /// Overrides `repo` as the key namespace.
    pub key_prefix: Option<String>,
    /// Lifetime of this host's fleet member record.
    #[serde(with = "serde_opt_str", skip_serializing_if = "Option::is_none")]
    pub member_ttl: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            key_prefix: None,
            member_ttl: None,
        }
    }
}

impl Default for ShepherdConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            github_token: String::new(),
            github_api: "https://api.github.com".to_string(),
            include_prereleases: false,
            assets_download_path: PathBuf::from("/usr/local/src"),
            package_name_pattern: String::new(),
            deploy_command: String::new(),
            rollback_command: String::new(),
            healthcheck_command: String::new(),
            healthcheck_retries: 3,
            healthcheck_interval: Duration::from_secs(60),
            healthcheck_timeout: Duration::from_secs(30),
            canary_rollout_window: Duration::from_secs(15 * 60),
            rollout_window: Duration::from_secs(60),
            repository_polling_interval: Duration::from_secs(60),
            state_file_path: PathBuf::from("/var/lib/shepherd/state.json"),
            version_command: None,
            once: false,
            log_level: "info".to_string(),
            alert_webhook_url: None,
            alert_channel: None,
            redis: RedisConfig::default(),
        }
    }
}

/// How this host determines its last installed tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// JSON record persisted after every successful deploy.
    StateFile(PathBuf),
    /// Operator command printing the running version.
    VersionCommand(String),
}

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Upper bound for every configured duration. Lock and member TTLs are
/// small multiples of these and must stay representable.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 3600);

impl ShepherdConfig {
    /// Read and parse a TOML config file. Does not validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check required options and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("repo", &self.repo),
            ("github_token", &self.github_token),
            ("package_name_pattern", &self.package_name_pattern),
            ("deploy_command", &self.deploy_command),
            ("rollback_command", &self.rollback_command),
            ("healthcheck_command", &self.healthcheck_command),
            ("redis.host", &self.redis.host),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(field));
            }
        }

        match self.repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
            _ => {
                return Err(ConfigError::Invalid {
                    field: "repo",
                    reason: format!("expected owner/name, got {:?}", self.repo),
                });
            }
        }

        regex::Regex::new(&self.package_name_pattern).map_err(|e| ConfigError::Invalid {
            field: "package_name_pattern",
            reason: e.to_string(),
        })?;

        let durations = [
            ("healthcheck_interval", self.healthcheck_interval),
            ("healthcheck_timeout", self.healthcheck_timeout),
            ("canary_rollout_window", self.canary_rollout_window),
            ("rollout_window", self.rollout_window),
            ("repository_polling_interval", self.repository_polling_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
            check_max(field, value)?;
        }
        if let Some(ttl) = self.redis.member_ttl {
            check_max("redis.member_ttl", ttl)?;
        }

        if self.healthcheck_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "healthcheck_retries",
                reason: "must be at least 1".to_string(),
            });
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid {
                field: "log_level",
                reason: format!("unknown level {:?}", self.log_level),
            });
        }

        if let Some(cmd) = &self.version_command {
            if cmd.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "version_command",
                    reason: "must not be empty when set".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Key namespace in the shared store.
    pub fn namespace(&self) -> &str {
        match &self.redis.key_prefix {
            Some(prefix) if !prefix.is_empty() => prefix,
            _ => &self.repo,
        }
    }

    pub fn install_source(&self) -> InstallSource {
        match &self.version_command {
            Some(cmd) => InstallSource::VersionCommand(cmd.clone()),
            None => InstallSource::StateFile(self.state_file_path.clone()),
        }
    }

    /// TTL of the canary lock: twice the observation window.
    pub fn canary_lock_ttl(&self) -> Duration {
        self.canary_rollout_window * 2
    }

    /// TTL of the rollout lock: one rollout window.
    pub fn rollout_lock_ttl(&self) -> Duration {
        self.rollout_window
    }

    pub fn member_ttl(&self) -> Duration {
        self.redis.member_ttl.unwrap_or(self.rollout_window * 3)
    }
}

fn check_max(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value > MAX_DURATION {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must be at most {}", format_duration(MAX_DURATION)),
        });
    }
    Ok(())
}

//! Command-line flags. Every flag can also come from a `SHEPHERD_*`
//! environment variable and overrides the config file when present.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use shepherd_core::{ShepherdConfig, parse_duration};

pub const DEFAULT_CONFIG_PATH: &str = "~/.shepherd.toml";

#[derive(Debug, Parser)]
#[command(name = "shepherdd", version, about = "Shepherd canary rollout daemon")]
pub struct Cli {
    /// Config file path.
    #[arg(long, env = "SHEPHERD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Host name reported to the fleet (defaults to the system host name).
    #[arg(long, env = "SHEPHERD_HOSTNAME")]
    pub hostname: Option<String>,

    /// Repository in owner/name form.
    #[arg(long, env = "SHEPHERD_REPO")]
    pub repo: Option<String>,
    #[arg(long, env = "SHEPHERD_GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
    #[arg(long, env = "SHEPHERD_GITHUB_API")]
    pub github_api: Option<String>,
    /// Consider pre-releases when resolving the latest release.
    #[arg(long, env = "SHEPHERD_INCLUDE_PRERELEASES")]
    pub include_prereleases: bool,
    #[arg(long, env = "SHEPHERD_ASSETS_DOWNLOAD_PATH")]
    pub assets_download_path: Option<PathBuf>,
    #[arg(long, env = "SHEPHERD_PACKAGE_NAME_PATTERN")]
    pub package_name_pattern: Option<String>,

    #[arg(long, env = "SHEPHERD_DEPLOY_COMMAND")]
    pub deploy_command: Option<String>,
    #[arg(long, env = "SHEPHERD_ROLLBACK_COMMAND")]
    pub rollback_command: Option<String>,
    #[arg(long, env = "SHEPHERD_HEALTHCHECK_COMMAND")]
    pub healthcheck_command: Option<String>,
    #[arg(long, env = "SHEPHERD_HEALTHCHECK_RETRIES")]
    pub healthcheck_retries: Option<u32>,
    #[arg(long, env = "SHEPHERD_HEALTHCHECK_INTERVAL", value_parser = duration_arg)]
    pub healthcheck_interval: Option<Duration>,
    #[arg(long, env = "SHEPHERD_HEALTHCHECK_TIMEOUT", value_parser = duration_arg)]
    pub healthcheck_timeout: Option<Duration>,

    #[arg(long, env = "SHEPHERD_CANARY_ROLLOUT_WINDOW", value_parser = duration_arg)]
    pub canary_rollout_window: Option<Duration>,
    #[arg(long, env = "SHEPHERD_ROLLOUT_WINDOW", value_parser = duration_arg)]
    pub rollout_window: Option<Duration>,
    #[arg(long, env = "SHEPHERD_REPOSITORY_POLLING_INTERVAL", value_parser = duration_arg)]
    pub repository_polling_interval: Option<Duration>,

    #[arg(long, env = "SHEPHERD_STATE_FILE_PATH")]
    pub state_file_path: Option<PathBuf>,
    /// Command printing the running version; replaces the state file.
    #[arg(long, env = "SHEPHERD_VERSION_COMMAND")]
    pub version_command: Option<String>,

    /// Run each loop once and exit.
    #[arg(long, env = "SHEPHERD_ONCE")]
    pub once: bool,
    /// debug, info, warn or error.
    #[arg(long, env = "SHEPHERD_LOG_LEVEL")]
    pub log_level: Option<String>,
    #[arg(long, env = "SHEPHERD_ALERT_WEBHOOK_URL", hide_env_values = true)]
    pub alert_webhook_url: Option<String>,
    #[arg(long, env = "SHEPHERD_ALERT_CHANNEL")]
    pub alert_channel: Option<String>,

    #[arg(long, env = "SHEPHERD_REDIS_HOST")]
    pub redis_host: Option<String>,
    #[arg(long, env = "SHEPHERD_REDIS_PORT")]
    pub redis_port: Option<u16>,
    #[arg(long, env = "SHEPHERD_REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,
    #[arg(long, env = "SHEPHERD_REDIS_DB")]
    pub redis_db: Option<i64>,
    /// Key namespace; defaults to the repository.
    #[arg(long, env = "SHEPHERD_REDIS_KEY_PREFIX")]
    pub redis_key_prefix: Option<String>,
    #[arg(long, env = "SHEPHERD_MEMBER_TTL", value_parser = duration_arg)]
    pub member_ttl: Option<Duration>,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration {s:?}, expected e.g. 30s, 15m, 1h"))
}

macro_rules! overlay {
    ($cli:expr, $cfg:expr, $($field:ident),+ $(,)?) => {
        $(if let Some(v) = $cli.$field.clone() { $cfg.$field = v; })+
    };
}

impl Cli {
    /// Config path with a leading `~` expanded from `home`.
    pub fn config_path(&self, home: Option<&Path>) -> PathBuf {
        expand_home(&self.config, home)
    }

    /// Apply flags on top of a file-loaded config.
    pub fn apply(&self, config: &mut ShepherdConfig) {
        overlay!(
            self,
            config,
            repo,
            github_token,
            github_api,
            assets_download_path,
            package_name_pattern,
            deploy_command,
            rollback_command,
            healthcheck_command,
            healthcheck_retries,
            healthcheck_interval,
            healthcheck_timeout,
            canary_rollout_window,
            rollout_window,
            repository_polling_interval,
            state_file_path,
            log_level,
        );
        if self.include_prereleases {
            config.include_prereleases = true;
        }
        if self.once {
            config.once = true;
        }
        if self.version_command.is_some() {
            config.version_command = self.version_command.clone();
        }
        if self.alert_webhook_url.is_some() {
            config.alert_webhook_url = self.alert_webhook_url.clone();
        }
        if self.alert_channel.is_some() {
            config.alert_channel = self.alert_channel.clone();
        }

        let redis = &mut config.redis;
        if let Some(host) = &self.redis_host {
            redis.host = host.clone();
        }
        if let Some(port) = self.redis_port {
            redis.port = port;
        }
        if let Some(db) = self.redis_db {
            redis.db = db;
        }
        if self.redis_password.is_some() {
            redis.password = self.redis_password.clone();
        }
        if self.redis_key_prefix.is_some() {
            redis.key_prefix = self.redis_key_prefix.clone();
        }
        if self.member_ttl.is_some() {
            redis.member_ttl = self.member_ttl;
        }
    }
}

pub fn expand_home(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => home.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["shepherdd"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_override_file_values() {
        let mut config = ShepherdConfig::from_toml_str(
            r#"
repo = "acme/api"
rollout_window = "5m"

[redis]
host = "redis.internal"
"#,
        )
        .unwrap();

        parse(&[
            "--repo",
            "acme/web",
            "--rollout-window",
            "90s",
            "--redis-port",
            "6380",
            "--once",
        ])
        .apply(&mut config);

        assert_eq!(config.repo, "acme/web");
        assert_eq!(config.rollout_window, Duration::from_secs(90));
        assert_eq!(config.redis.host, "redis.internal");
        assert_eq!(config.redis.port, 6380);
        assert!(config.once);
    }

    #[test]
    fn absent_flags_leave_config_untouched() {
        let mut config = ShepherdConfig {
            repo: "acme/api".to_string(),
            version_command: Some("cat /etc/api-version".to_string()),
            ..Default::default()
        };
        let before = config.clone();
        parse(&[]).apply(&mut config);
        assert_eq!(config, before);
    }

    #[test]
    fn bad_duration_is_rejected() {
        let err = Cli::try_parse_from(["shepherdd", "--rollout-window", "soon"]).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn member_ttl_and_key_prefix_reach_redis_config() {
        let mut config = ShepherdConfig::default();
        parse(&["--member-ttl", "10m", "--redis-key-prefix", "prod"]).apply(&mut config);
        assert_eq!(config.redis.member_ttl, Some(Duration::from_secs(600)));
        assert_eq!(config.namespace(), "prod");
    }

    #[test]
    fn tilde_expands_from_home() {
        let home = Path::new("/home/ops");
        assert_eq!(
            expand_home("~/.shepherd.toml", Some(home)),
            PathBuf::from("/home/ops/.shepherd.toml")
        );
        assert_eq!(
            expand_home("/etc/shepherd.toml", Some(home)),
            PathBuf::from("/etc/shepherd.toml")
        );
        assert_eq!(expand_home("~/x", None), PathBuf::from("~/x"));
    }
}

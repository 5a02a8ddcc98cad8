//! shepherd-core — shared vocabulary for the shepherd rollout daemon.
//!
//! Holds the release-tag types, the daemon configuration model (TOML file
//! parsing, defaults, validation), human-readable duration parsing, and the
//! [`CommandRunner`] seam through which every operator-supplied script
//! (deploy, rollback, health check) is executed.

pub mod config;
pub mod duration;
pub mod exec;
pub mod types;

pub use config::{ConfigError, InstallSource, RedisConfig, ShepherdConfig};
pub use duration::parse_duration;
pub use exec::{CommandRunner, ExecError, ShellRunner};
pub use types::*;

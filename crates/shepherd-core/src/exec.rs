//! Execution of operator-supplied scripts.
//!
//! Deploy, rollback and health-check commands all share one calling
//! convention: the command path is resolved to an absolute path, run
//! without arguments, and receives the release under test through the
//! `RELEASE_TAG` and `ASSET_FILE` environment variables. A non-zero exit
//! status is an error carrying the combined output.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Environment variable carrying the release tag.
pub const ENV_RELEASE_TAG: &str = "RELEASE_TAG";
/// Environment variable carrying the local asset path.
pub const ENV_ASSET_FILE: &str = "ASSET_FILE";

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },

    #[error("{command} timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

impl ExecError {
    /// Output captured before the failure, if any.
    pub fn output(&self) -> &str {
        match self {
            ExecError::Failed { output, .. } => output,
            _ => "",
        }
    }
}

/// Runs operator scripts on behalf of the deployer and health checker.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` for `tag`/`asset`, returning its combined output.
    ///
    /// `timeout` bounds a single invocation; `None` waits for the script
    /// to terminate on its own.
    async fn execute(
        &self,
        command: &str,
        tag: &str,
        asset: &Path,
        timeout: Option<Duration>,
    ) -> Result<String, ExecError>;
}

/// [`CommandRunner`] that spawns real OS processes.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

fn resolve(command: &str) -> PathBuf {
    std::path::absolute(command).unwrap_or_else(|_| PathBuf::from(command))
}

fn combine(stdout: &[u8], stderr: &[u8]) -> String {
    let mut out = String::from_utf8_lossy(stdout).into_owned();
    out.push_str(&String::from_utf8_lossy(stderr));
    out
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(
        &self,
        command: &str,
        tag: &str,
        asset: &Path,
        timeout: Option<Duration>,
    ) -> Result<String, ExecError> {
        let path = resolve(command);
        let mut cmd = Command::new(&path);
        cmd.env(ENV_RELEASE_TAG, tag)
            .env(ENV_ASSET_FILE, asset)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let run = cmd.output();
        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ExecError::TimedOut {
                        command: command.to_string(),
                        timeout: limit,
                    });
                }
            },
            None => run.await,
        }
        .map_err(|source| ExecError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let combined = combine(&output.stdout, &output.stderr);
        if !output.status.success() {
            return Err(ExecError::Failed {
                command: command.to_string(),
                status: output.status.to_string(),
                output: combined,
            });
        }

        debug!(%command, %tag, out = %combined, "command result");
        Ok(combined)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn passes_tag_and_asset_through_env() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "echo.sh", "echo \"$RELEASE_TAG $ASSET_FILE\"");

        let out = ShellRunner::new()
            .execute(&cmd, "v1.2.0", Path::new("/tmp/api.tar.gz"), None)
            .await
            .unwrap();
        assert_eq!(out.trim(), "v1.2.0 /tmp/api.tar.gz");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_combined_output() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "fail.sh", "echo out; echo err >&2; exit 3");

        let err = ShellRunner::new()
            .execute(&cmd, "v1", Path::new("asset"), None)
            .await
            .unwrap_err();
        match &err {
            ExecError::Failed { output, .. } => {
                assert!(output.contains("out"));
                assert!(output.contains("err"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(err.output().contains("err"));
    }

    #[tokio::test]
    async fn missing_command_is_spawn_error() {
        let err = ShellRunner::new()
            .execute("/nonexistent/deploy.sh", "v1", Path::new("asset"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn timeout_bounds_a_single_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "slow.sh", "sleep 5");

        let err = ShellRunner::new()
            .execute(&cmd, "v1", Path::new("asset"), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));
    }
}

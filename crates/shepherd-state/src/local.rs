//! Host-local record of the last installed tag.
//!
//! This is the host's only idempotency signal: the shared store never
//! learns which hosts installed what (outside the optional member
//! registry), so each host decides for itself whether a tag is new.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use shepherd_core::{InstallSource, ReleaseTag};

use crate::error::{StateError, StateResult};

/// Where this host learns what it is currently running.
#[async_trait]
pub trait InstallTracker: Send + Sync {
    /// Last successfully installed tag, if known.
    async fn last_installed(&self) -> StateResult<Option<ReleaseTag>>;

    /// Record a confirmed successful deploy of `tag`.
    async fn record_installed(&self, tag: &str) -> StateResult<()>;
}

/// Build the tracker selected by configuration.
pub fn tracker_for(source: &InstallSource) -> Arc<dyn InstallTracker> {
    match source {
        InstallSource::StateFile(path) => Arc::new(FileTracker::new(path)),
        InstallSource::VersionCommand(cmd) => Arc::new(CommandTracker::new(cmd)),
    }
}

/// On-disk JSON record: `{"last_installed_tag": "<tag>"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalInstallState {
    #[serde(default)]
    pub last_installed_tag: String,
}

/// Strategy A: persisted state file.
#[derive(Debug, Clone)]
pub struct FileTracker {
    path: PathBuf,
}

impl FileTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StateError {
        StateError::LocalIo {
            path: self.path.clone(),
            source,
        }
    }

    /// Read the record; a missing file is an empty record.
    pub fn read(&self) -> StateResult<LocalInstallState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LocalInstallState::default());
            }
            Err(e) => return Err(self.io_err(e)),
        };
        if content.trim().is_empty() {
            return Ok(LocalInstallState::default());
        }
        serde_json::from_str(&content).map_err(|e| StateError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Write the record, creating parent directories, owner-only.
    pub fn write(&self, state: &LocalInstallState) -> StateResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_private_dir(dir).map_err(|e| self.io_err(e))?;
        }
        let body =
            serde_json::to_vec(state).map_err(|e| StateError::Serialize(e.to_string()))?;
        let mut file = open_private(&self.path).map_err(|e| self.io_err(e))?;
        file.write_all(&body).map_err(|e| self.io_err(e))?;
        file.write_all(b"\n").map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // The mode only applies on creation.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[async_trait]
impl InstallTracker for FileTracker {
    async fn last_installed(&self) -> StateResult<Option<ReleaseTag>> {
        let state = self.read()?;
        Ok(Some(state.last_installed_tag).filter(|t| !t.is_empty()))
    }

    async fn record_installed(&self, tag: &str) -> StateResult<()> {
        if tag.is_empty() {
            return Err(StateError::EmptyTag);
        }
        self.write(&LocalInstallState {
            last_installed_tag: tag.to_string(),
        })?;
        debug!(%tag, path = ?self.path, "last installed tag recorded");
        Ok(())
    }
}

/// Strategy B: ask the running system via an operator command.
///
/// The command is run through `sh -c` on every call; nothing is cached.
#[derive(Debug, Clone)]
pub struct CommandTracker {
    command: String,
}

impl CommandTracker {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

#[async_trait]
impl InstallTracker for CommandTracker {
    async fn last_installed(&self) -> StateResult<Option<ReleaseTag>> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| StateError::VersionQuery {
                command: self.command.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(StateError::VersionQuery {
                command: self.command.clone(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(command = %self.command, %version, "queried running version");
        Ok(Some(version).filter(|v| !v.is_empty()))
    }

    async fn record_installed(&self, _tag: &str) -> StateResult<()> {
        // The running system is the record.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(dir.path().join("state.json"));

        assert_eq!(tracker.last_installed().await.unwrap(), None);
        tracker.record_installed("v1.2.3").await.unwrap();
        assert_eq!(
            tracker.last_installed().await.unwrap().as_deref(),
            Some("v1.2.3")
        );
    }

    #[tokio::test]
    async fn file_uses_wire_format_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("var/lib/shepherd/state.json");
        let tracker = FileTracker::new(&path);
        tracker.record_installed("v2").await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["last_installed_tag"], "v2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        FileTracker::new(&path).record_installed("v1").await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn file_rejects_empty_tag() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(dir.path().join("state.json"));
        assert!(matches!(
            tracker.record_installed("").await,
            Err(StateError::EmptyTag)
        ));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileTracker::new(&path).last_installed().await,
            Err(StateError::Corrupt { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_reports_trimmed_version() {
        let tracker = CommandTracker::new("echo v1.0.0");
        assert_eq!(
            tracker.last_installed().await.unwrap().as_deref(),
            Some("v1.0.0")
        );
        // Recording is a no-op; the command remains the source of truth.
        tracker.record_installed("v9").await.unwrap();
        assert_eq!(
            tracker.last_installed().await.unwrap().as_deref(),
            Some("v1.0.0")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_failure_and_empty_output() {
        assert!(matches!(
            CommandTracker::new("exit 2").last_installed().await,
            Err(StateError::VersionQuery { .. })
        ));
        assert_eq!(CommandTracker::new("true").last_installed().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tracker_for_selects_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let file = tracker_for(&InstallSource::StateFile(path.clone()));
        file.record_installed("v4").await.unwrap();
        assert_eq!(file.last_installed().await.unwrap().as_deref(), Some("v4"));
        assert!(path.exists());

        let command = tracker_for(&InstallSource::VersionCommand("echo v1".to_string()));
        command.record_installed("v4").await.unwrap();
        assert_eq!(command.last_installed().await.unwrap().as_deref(), Some("v1"));
    }
}

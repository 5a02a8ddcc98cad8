//! Deployer — resolves a release asset and runs an operator script on it.

use std::sync::Arc;

use tracing::{debug, info};

use shepherd_core::{CommandRunner, ExecError, ShepherdConfig};
use shepherd_release::{FetchError, ReleaseFetcher, ResolvedAsset};

/// Deploy and rollback scripts bound to a release source.
///
/// Neither script carries a timeout; the operator's script is expected to
/// terminate on its own.
#[derive(Clone)]
pub struct Deployer {
    fetcher: Arc<dyn ReleaseFetcher>,
    runner: Arc<dyn CommandRunner>,
    deploy_command: String,
    rollback_command: String,
}

impl Deployer {
    pub fn new(
        fetcher: Arc<dyn ReleaseFetcher>,
        runner: Arc<dyn CommandRunner>,
        deploy_command: &str,
        rollback_command: &str,
    ) -> Self {
        Self {
            fetcher,
            runner,
            deploy_command: deploy_command.to_string(),
            rollback_command: rollback_command.to_string(),
        }
    }

    pub fn from_config(
        config: &ShepherdConfig,
        fetcher: Arc<dyn ReleaseFetcher>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self::new(
            fetcher,
            runner,
            &config.deploy_command,
            &config.rollback_command,
        )
    }

    /// Resolve `tag` (or `latest`) to a concrete tag and local asset.
    pub async fn resolve(&self, tag: &str) -> Result<ResolvedAsset, FetchError> {
        self.fetcher.download_release_asset(tag).await
    }

    pub async fn deploy(&self, asset: &ResolvedAsset) -> Result<String, ExecError> {
        self.run(&self.deploy_command, asset, "deploy").await
    }

    pub async fn rollback(&self, asset: &ResolvedAsset) -> Result<String, ExecError> {
        self.run(&self.rollback_command, asset, "rollback").await
    }

    async fn run(
        &self,
        command: &str,
        asset: &ResolvedAsset,
        action: &'static str,
    ) -> Result<String, ExecError> {
        info!(action, tag = %asset.tag, %command, "start {action}");
        let output = self
            .runner
            .execute(command, &asset.tag, &asset.path, None)
            .await?;
        debug!(action, tag = %asset.tag, %output, "command output");
        info!(action, tag = %asset.tag, "{action} success");
        Ok(output)
    }
}

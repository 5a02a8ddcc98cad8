//! Rollout coordinator — the canary and stable-rollout ticks.
//!
//! Every tick either returns an outcome (skip, deploy, promote, rollback)
//! or a fatal [`RolloutError`]. Cross-host exclusion comes only from the
//! shared-state locks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use shepherd_core::{CommandRunner, LATEST_TAG, LockName, ReleaseTag, ShepherdConfig};
use shepherd_health::{HealthCheckConfig, HealthChecker, HealthOutcome};
use shepherd_release::{ReleaseFetcher, ResolvedAsset};
use shepherd_state::{InstallTracker, MemberState, SharedState, can_install};

use crate::deployer::Deployer;
use crate::dispatcher::TickHandler;
use crate::error::{RolloutError, RolloutResult};
use crate::outcome::{SkipReason, TickOutcome};
use crate::phase::{Attempt, LoopKind, RolloutPhase};

/// Drives both loops for one host.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<ShepherdConfig>,
    hostname: String,
    shared: Arc<dyn SharedState>,
    tracker: Arc<dyn InstallTracker>,
    deployer: Deployer,
    health: HealthChecker,
}

impl Coordinator {
    pub fn new(
        config: Arc<ShepherdConfig>,
        hostname: &str,
        shared: Arc<dyn SharedState>,
        tracker: Arc<dyn InstallTracker>,
        fetcher: Arc<dyn ReleaseFetcher>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let deployer = Deployer::from_config(&config, fetcher, runner.clone());
        let health = HealthChecker::new(runner, HealthCheckConfig::from_config(&config));
        Self {
            config,
            hostname: hostname.to_string(),
            shared,
            tracker,
            deployer,
            health,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    // ── Canary loop ───────────────────────────────────────────────

    /// Detect a new release, canary it on this host, promote or roll back.
    pub async fn canary_tick(&self) -> RolloutResult<TickOutcome> {
        let asset = match self.deployer.resolve(LATEST_TAG).await {
            Ok(asset) => asset,
            Err(e) if e.is_asset_not_found() => {
                info!(reason = %e, "canary skipped: no matching asset");
                return Ok(TickOutcome::Skipped(SkipReason::AssetNotFound));
            }
            Err(e) => return Err(e.into()),
        };
        let tag = asset.tag.clone();

        // Already validated fleet-wide; no need to take the lock.
        if self.shared.stable_tag().await?.as_deref() == Some(tag.as_str()) {
            return Ok(skip(LoopKind::Canary, &tag, SkipReason::AlreadyInstalled));
        }

        let eligibility = can_install(self.shared.as_ref(), self.tracker.as_ref(), &tag).await?;
        if let Some(reason) = SkipReason::from_eligibility(eligibility) {
            return Ok(skip(LoopKind::Canary, &tag, reason));
        }
        // Read before deploying: a version command reports the new tag after.
        let previous = self.tracker.last_installed().await?;

        let mut attempt = Attempt::new(LoopKind::Canary, &tag);
        let ttl = self.config.canary_lock_ttl();
        if !self.shared.try_acquire_lock(LockName::Canary, &tag, ttl).await? {
            return Ok(skip(LoopKind::Canary, &tag, SkipReason::LockHeld));
        }
        attempt.advance(RolloutPhase::LockAcquired)?;
        info!(%tag, lock = %LockName::Canary, ttl = ?ttl, "canary lock acquired");

        // A failed deploy leaves the lock to expire; the artifact was never
        // validated, so it is not avoided either.
        self.deployer
            .deploy(&asset)
            .await
            .map_err(|source| RolloutError::DeployFailed {
                tag: tag.clone(),
                source,
            })?;
        attempt.advance(RolloutPhase::Deployed)?;

        attempt.advance(RolloutPhase::Observing)?;
        let outcome = match self.health.observe(&tag, &asset.path).await {
            HealthOutcome::Healthy => {
                self.promote(&tag).await?;
                attempt.advance(RolloutPhase::Promoted)?;
                self.publish_member(&tag).await;
                TickOutcome::Promoted(tag)
            }
            HealthOutcome::Unhealthy { output, cause } => {
                warn!(%tag, %cause, %output, "canary unhealthy, rolling back");
                let target = self.roll_back(&tag, previous).await?;
                attempt.advance(RolloutPhase::RolledBack)?;
                self.publish_member(&target).await;
                TickOutcome::RolledBack {
                    failed: tag,
                    target,
                }
            }
        };
        attempt.finish()?;
        Ok(outcome)
    }

    async fn promote(&self, tag: &str) -> RolloutResult<()> {
        self.shared.set_stable_tag(tag).await?;
        self.tracker.record_installed(tag).await?;
        // Released early so the exclusion window ends with the canary.
        self.shared.release_lock(LockName::Canary).await?;
        info!(%tag, "canary promoted to stable");
        Ok(())
    }

    /// Avoid `failed` and redeploy the rollback target with the rollback
    /// command. `previous` is this host's install from before the canary
    /// deploy. Returns the target tag.
    async fn roll_back(
        &self,
        failed: &str,
        previous: Option<ReleaseTag>,
    ) -> RolloutResult<ReleaseTag> {
        self.shared.add_avoided(failed).await?;
        info!(tag = %failed, "tag added to avoid set");

        let target = self.rollback_target(failed, previous).await?;
        let asset: ResolvedAsset = self.deployer.resolve(&target).await?;
        self.deployer
            .rollback(&asset)
            .await
            .map_err(|source| RolloutError::RollbackFailed {
                tag: target.clone(),
                source,
            })?;
        warn!(failed = %failed, %target, "rolled back");
        Ok(target)
    }

    /// Stable tag if set, else the pre-deploy install. Never `failed`.
    async fn rollback_target(
        &self,
        failed: &str,
        previous: Option<ReleaseTag>,
    ) -> RolloutResult<ReleaseTag> {
        let usable = |t: &ReleaseTag| !t.is_empty() && t != failed;
        if let Some(stable) = self.shared.stable_tag().await?.filter(usable) {
            return Ok(stable);
        }
        if let Some(last) = previous.filter(usable) {
            return Ok(last);
        }
        error!(tag = %failed, "no rollback target");
        Err(RolloutError::NoRollbackTarget {
            failed: failed.to_string(),
        })
    }

    // ── Stable rollout loop ───────────────────────────────────────

    /// Install the stable tag on this host if it is not already there.
    pub async fn rollout_tick(&self) -> RolloutResult<TickOutcome> {
        let Some(tag) = self.shared.stable_tag().await?.filter(|t| !t.is_empty()) else {
            info!("rollout skipped: no stable tag");
            return Ok(TickOutcome::Skipped(SkipReason::NoStableTag));
        };

        let outcome = self.rollout_stable(&tag).await?;
        self.report_progress(&tag).await;
        Ok(outcome)
    }

    async fn rollout_stable(&self, tag: &str) -> RolloutResult<TickOutcome> {
        let eligibility = can_install(self.shared.as_ref(), self.tracker.as_ref(), tag).await?;
        if let Some(reason) = SkipReason::from_eligibility(eligibility) {
            return Ok(skip(LoopKind::Rollout, tag, reason));
        }

        let mut attempt = Attempt::new(LoopKind::Rollout, tag);
        let ttl = self.config.rollout_lock_ttl();
        if !self.shared.try_acquire_lock(LockName::Rollout, tag, ttl).await? {
            return Ok(skip(LoopKind::Rollout, tag, SkipReason::LockHeld));
        }
        attempt.advance(RolloutPhase::LockAcquired)?;
        info!(%tag, lock = %LockName::Rollout, ttl = ?ttl, "rollout lock acquired");

        let asset = self.deployer.resolve(tag).await?;
        self.deployer
            .deploy(&asset)
            .await
            .map_err(|source| RolloutError::DeployFailed {
                tag: tag.to_string(),
                source,
            })?;
        self.tracker.record_installed(&asset.tag).await?;
        attempt.advance(RolloutPhase::Deployed)?;
        attempt.finish()?;
        Ok(TickOutcome::Deployed(asset.tag))
    }

    // ── Member registry ───────────────────────────────────────────

    async fn publish_member(&self, version: &str) {
        let member = MemberState::new(&self.hostname, version);
        if let Err(e) = self.shared.publish_member(&member, self.config.member_ttl()).await {
            warn!(host = %self.hostname, error = %e, "failed to publish member state");
        }
    }

    /// Refresh this host's registry entry and log fleet progress on `stable`.
    async fn report_progress(&self, stable: &str) {
        match self.tracker.last_installed().await {
            Ok(Some(current)) => self.publish_member(&current).await,
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "failed to read last installed tag");
                return;
            }
        }
        match self.shared.rollout_progress(stable).await {
            Ok(progress) => info!(
                tag = %stable,
                installed = progress.installed,
                total = progress.total,
                complete = progress.is_complete(),
                "rollout progress"
            ),
            Err(e) => warn!(tag = %stable, error = %e, "failed to read rollout progress"),
        }
    }
}

fn skip(kind: LoopKind, tag: &str, reason: SkipReason) -> TickOutcome {
    info!(loop_kind = %kind, %tag, %reason, "{kind} skipped");
    TickOutcome::Skipped(reason)
}

#[async_trait]
impl TickHandler for Coordinator {
    async fn canary_tick(&self) -> RolloutResult<TickOutcome> {
        Coordinator::canary_tick(self).await
    }

    async fn rollout_tick(&self) -> RolloutResult<TickOutcome> {
        Coordinator::rollout_tick(self).await
    }
}

//! Sequential two-timer dispatcher.
//!
//! Both loops run on one task, so a tick always runs to completion before
//! the next timer event is serviced. While a long canary observation runs,
//! further rollout ticks coalesce into a single pending tick.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use shepherd_core::ShepherdConfig;

use crate::error::RolloutResult;
use crate::outcome::TickOutcome;
use crate::phase::LoopKind;

/// The two ticks the dispatcher drives.
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn canary_tick(&self) -> RolloutResult<TickOutcome>;
    async fn rollout_tick(&self) -> RolloutResult<TickOutcome>;
}

pub struct Dispatcher<H> {
    handler: H,
    polling_interval: Duration,
    rollout_window: Duration,
    once: bool,
}

impl<H: TickHandler> Dispatcher<H> {
    pub fn new(handler: H, polling_interval: Duration, rollout_window: Duration, once: bool) -> Self {
        Self {
            handler,
            polling_interval,
            rollout_window,
            once,
        }
    }

    pub fn from_config(handler: H, config: &ShepherdConfig) -> Self {
        Self::new(
            handler,
            config.repository_polling_interval,
            config.rollout_window,
            config.once,
        )
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run until shutdown is signalled or a tick fails fatally.
    ///
    /// In one-shot mode each loop runs exactly once, canary first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> RolloutResult<()> {
        if self.once {
            info!("one-shot run");
            self.dispatch(LoopKind::Canary).await?;
            self.dispatch(LoopKind::Rollout).await?;
            return Ok(());
        }

        info!(
            polling_interval = ?self.polling_interval,
            rollout_window = ?self.rollout_window,
            "dispatcher started"
        );
        let now = Instant::now();
        let mut canary = tokio::time::interval_at(now + self.polling_interval, self.polling_interval);
        let mut rollout = tokio::time::interval_at(now + self.rollout_window, self.rollout_window);
        // Missed ticks collapse into one immediate tick.
        canary.set_missed_tick_behavior(MissedTickBehavior::Skip);
        rollout.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("dispatcher shutting down");
                    return Ok(());
                }
                _ = canary.tick() => self.dispatch(LoopKind::Canary).await?,
                _ = rollout.tick() => self.dispatch(LoopKind::Rollout).await?,
            }
        }
    }

    async fn dispatch(&self, kind: LoopKind) -> RolloutResult<()> {
        let result = match kind {
            LoopKind::Canary => self.handler.canary_tick().await,
            LoopKind::Rollout => self.handler.rollout_tick().await,
        };
        match result {
            Ok(outcome) => {
                info!(loop_kind = %kind, %outcome, "tick complete");
                Ok(())
            }
            Err(e) => {
                error!(loop_kind = %kind, error = %e, "fatal error");
                Err(e)
            }
        }
    }
}

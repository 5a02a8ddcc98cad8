//! Per-attempt phase machine.
//!
//! ```text
//! Idle → LockAcquired → Deployed ─┬─→ Idle                      (rollout)
//!                                 └─→ Observing → Promoted   → Idle
//!                                               → RolledBack → Idle
//! ```

use std::fmt;

use tokio::time::Instant;
use tracing::{debug, info};

use shepherd_core::ReleaseTag;

use crate::error::{RolloutError, RolloutResult};

/// Which loop an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Canary,
    Rollout,
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopKind::Canary => "canary",
            LoopKind::Rollout => "rollout",
        })
    }
}

/// Current phase of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RolloutPhase {
    Idle,
    LockAcquired,
    Deployed,
    /// Canary only: health checker running.
    Observing,
    Promoted,
    RolledBack,
}

impl RolloutPhase {
    pub fn can_transition_to(self, next: RolloutPhase) -> bool {
        use RolloutPhase::*;
        matches!(
            (self, next),
            (Idle, LockAcquired)
                | (LockAcquired, Deployed)
                | (Deployed, Observing)
                | (Deployed, Idle)
                | (Observing, Promoted)
                | (Observing, RolledBack)
                | (Promoted, Idle)
                | (RolledBack, Idle)
        )
    }
}

/// One attempt to act on a tag, from lock acquisition to completion.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub kind: LoopKind,
    pub tag: ReleaseTag,
    pub phase: RolloutPhase,
    pub history: Vec<RolloutPhase>,
    started_at: Instant,
}

impl Attempt {
    pub fn new(kind: LoopKind, tag: &str) -> Self {
        Self {
            kind,
            tag: tag.to_string(),
            phase: RolloutPhase::Idle,
            history: vec![RolloutPhase::Idle],
            started_at: Instant::now(),
        }
    }

    /// Move to `next`, rejecting transitions the machine does not allow.
    pub fn advance(&mut self, next: RolloutPhase) -> RolloutResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(RolloutError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!(
            kind = %self.kind,
            tag = %self.tag,
            from = ?self.phase,
            to = ?next,
            "phase transition"
        );
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    /// Close the attempt, returning to `Idle`.
    pub fn finish(&mut self) -> RolloutResult<()> {
        let last = self.phase;
        self.advance(RolloutPhase::Idle)?;
        info!(
            kind = %self.kind,
            tag = %self.tag,
            result = ?last,
            elapsed = ?self.started_at.elapsed(),
            "attempt finished"
        );
        Ok(())
    }
}

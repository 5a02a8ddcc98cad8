use shepherd_core::{ExecError, ReleaseTag};
use shepherd_release::FetchError;
use shepherd_state::StateError;
use thiserror::Error;

use crate::phase::RolloutPhase;

pub type RolloutResult<T> = Result<T, RolloutError>;

/// Unrecoverable tick failures. Skips and rollbacks are not errors.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("release fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("deploy of {tag} failed: {source}")]
    DeployFailed { tag: ReleaseTag, source: ExecError },

    #[error("rollback to {tag} failed: {source}")]
    RollbackFailed { tag: ReleaseTag, source: ExecError },

    #[error("no rollback target after {failed} failed: stable tag and last installed tag are both empty")]
    NoRollbackTarget { failed: ReleaseTag },

    #[error("invalid phase transition {from:?} -> {to:?}")]
    InvalidTransition { from: RolloutPhase, to: RolloutPhase },
}

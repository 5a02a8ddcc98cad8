//! Tick outcomes.

use std::fmt;

use shepherd_core::ReleaseTag;
use shepherd_state::Eligibility;

/// Why a tick took no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The newest release has no asset matching the package pattern.
    AssetNotFound,
    AlreadyInstalled,
    Avoided,
    /// Another host holds the lock for this loop.
    LockHeld,
    NoStableTag,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::AssetNotFound => "asset not found",
            SkipReason::AlreadyInstalled => "already installed",
            SkipReason::Avoided => "avoided",
            SkipReason::LockHeld => "lock held by another host",
            SkipReason::NoStableTag => "no stable tag",
        }
    }

    /// Skip reason for a non-installable verdict.
    pub(crate) fn from_eligibility(e: Eligibility) -> Option<Self> {
        match e {
            Eligibility::Installable => None,
            Eligibility::AlreadyInstalled => Some(SkipReason::AlreadyInstalled),
            Eligibility::Avoided => Some(SkipReason::Avoided),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one loop tick that did not hit a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    /// Stable rollout installed the tag on this host.
    Deployed(ReleaseTag),
    /// Canary passed its window and became the stable tag.
    Promoted(ReleaseTag),
    /// Canary failed; `failed` was avoided and `target` redeployed.
    RolledBack {
        failed: ReleaseTag,
        target: ReleaseTag,
    },
}

impl TickOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(self, TickOutcome::Skipped(_))
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            TickOutcome::Deployed(tag) => write!(f, "deployed {tag}"),
            TickOutcome::Promoted(tag) => write!(f, "promoted {tag}"),
            TickOutcome::RolledBack { failed, target } => {
                write!(f, "rolled back {failed} to {target}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_maps_to_skip() {
        assert_eq!(SkipReason::from_eligibility(Eligibility::Installable), None);
        assert_eq!(
            SkipReason::from_eligibility(Eligibility::Avoided),
            Some(SkipReason::Avoided)
        );
        assert_eq!(
            SkipReason::from_eligibility(Eligibility::AlreadyInstalled),
            Some(SkipReason::AlreadyInstalled)
        );
    }

    #[test]
    fn display() {
        let o = TickOutcome::RolledBack {
            failed: "v3".into(),
            target: "v2".into(),
        };
        assert_eq!(o.to_string(), "rolled back v3 to v2");
        assert_eq!(
            TickOutcome::Skipped(SkipReason::LockHeld).to_string(),
            "skipped (lock held by another host)"
        );
        assert!(TickOutcome::Skipped(SkipReason::NoStableTag).is_skip());
    }
}

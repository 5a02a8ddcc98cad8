//! Records kept in the shared store for fleet progress reporting.

use serde::{Deserialize, Serialize};

/// What one host last reported about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberState {
    pub hostname: String,
    /// Tag currently installed on the host (empty if unknown).
    pub current_version: String,
    /// Unix timestamp (seconds) of the report.
    pub updated_at: u64,
}

impl MemberState {
    pub fn new(hostname: &str, current_version: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            current_version: current_version.to_string(),
            updated_at: epoch_secs(),
        }
    }
}

/// How many live hosts run a given tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RolloutProgress {
    pub installed: usize,
    pub total: usize,
}

impl RolloutProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.installed == self.total
    }
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_state_serializes() {
        let m = MemberState::new("web-1", "v1.0.0");
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"current_version\":\"v1.0.0\""));
        assert!(m.updated_at > 1_704_067_200);
    }

    #[test]
    fn progress_completion() {
        assert!(!RolloutProgress::default().is_complete());
        assert!(!RolloutProgress { installed: 1, total: 2 }.is_complete());
        assert!(RolloutProgress { installed: 2, total: 2 }.is_complete());
    }
}

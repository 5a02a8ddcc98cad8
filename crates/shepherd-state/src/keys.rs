//! Key layout in the shared store.
//!
//! Every key is `{namespace}_{suffix}`; the namespace is the repository
//! (or an explicit prefix) so independent repositories never collide.

use shepherd_core::LockName;

/// Resolved key names for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateKeys {
    namespace: String,
    /// String: most recently validated tag.
    pub stable: String,
    /// Set: tags that failed validation.
    pub avoid: String,
    /// String with TTL: holder of the canary lock.
    pub canary_lock: String,
    /// String with TTL: holder of the rollout lock.
    pub rollout_lock: String,
    /// Set: host names that have published a member record.
    pub members: String,
}

impl StateKeys {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            stable: format!("{namespace}_stable_release_tag"),
            avoid: format!("{namespace}_avoid_release_tag"),
            canary_lock: format!("{namespace}_{}", LockName::Canary.key_suffix()),
            rollout_lock: format!("{namespace}_{}", LockName::Rollout.key_suffix()),
            members: format!("{namespace}_members"),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn lock(&self, lock: LockName) -> &str {
        match lock {
            LockName::Canary => &self.canary_lock,
            LockName::Rollout => &self.rollout_lock,
        }
    }

    /// Per-host member record key.
    pub fn member(&self, hostname: &str) -> String {
        format!("{}_member_{hostname}", self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let keys = StateKeys::new("acme/api");
        assert_eq!(keys.stable, "acme/api_stable_release_tag");
        assert_eq!(keys.avoid, "acme/api_avoid_release_tag");
        assert_eq!(keys.lock(LockName::Canary), "acme/api_canary_release_tag");
        assert_eq!(keys.lock(LockName::Rollout), "acme/api_rollout");
        assert_eq!(keys.member("web-1"), "acme/api_member_web-1");
    }

    #[test]
    fn namespaces_do_not_collide() {
        let a = StateKeys::new("acme/api");
        let b = StateKeys::new("acme/worker");
        assert_ne!(a.stable, b.stable);
        assert_ne!(a.canary_lock, b.canary_lock);
    }
}

//! Install eligibility — may this host install a given tag?

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::local::InstallTracker;
use crate::store::SharedState;

/// Verdict of [`can_install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Installable,
    /// The tag equals this host's last installed tag.
    AlreadyInstalled,
    /// The tag failed validation somewhere in the fleet.
    Avoided,
}

impl Eligibility {
    pub fn is_installable(self) -> bool {
        self == Eligibility::Installable
    }
}

/// Decide whether `tag` may be installed on this host.
///
/// The avoid set takes precedence over local state: a blacklisted tag is
/// reported as `Avoided` even if this host already runs it.
pub async fn can_install(
    shared: &dyn SharedState,
    tracker: &dyn InstallTracker,
    tag: &str,
) -> StateResult<Eligibility> {
    if tag.is_empty() {
        return Err(StateError::EmptyTag);
    }

    if shared.is_avoided(tag).await? {
        debug!(%tag, "tag is in the avoid set");
        return Ok(Eligibility::Avoided);
    }

    let last = tracker.last_installed().await?;
    debug!(%tag, last_installed = last.as_deref().unwrap_or(""), "comparing tags");
    if last.as_deref() == Some(tag) {
        return Ok(Eligibility::AlreadyInstalled);
    }

    Ok(Eligibility::Installable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::FileTracker;
    use crate::memory::MemoryState;

    async fn fixture(last: Option<&str>) -> (MemoryState, FileTracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(dir.path().join("state.json"));
        if let Some(tag) = last {
            tracker.record_installed(tag).await.unwrap();
        }
        (MemoryState::new(), tracker, dir)
    }

    #[tokio::test]
    async fn fresh_host_can_install() {
        let (shared, tracker, _dir) = fixture(None).await;
        assert_eq!(
            can_install(&shared, &tracker, "v1").await.unwrap(),
            Eligibility::Installable
        );
    }

    #[tokio::test]
    async fn last_installed_tag_is_already_installed() {
        let (shared, tracker, _dir) = fixture(Some("v2")).await;
        assert_eq!(
            can_install(&shared, &tracker, "v2").await.unwrap(),
            Eligibility::AlreadyInstalled
        );
        assert!(can_install(&shared, &tracker, "v3").await.unwrap().is_installable());
    }

    #[tokio::test]
    async fn avoided_even_if_never_installed() {
        let (shared, tracker, _dir) = fixture(None).await;
        shared.add_avoided("v3").await.unwrap();
        assert_eq!(
            can_install(&shared, &tracker, "v3").await.unwrap(),
            Eligibility::Avoided
        );
    }

    #[tokio::test]
    async fn avoid_takes_precedence_over_installed() {
        let (shared, tracker, _dir) = fixture(Some("v3")).await;
        shared.add_avoided("v3").await.unwrap();
        assert_eq!(
            can_install(&shared, &tracker, "v3").await.unwrap(),
            Eligibility::Avoided
        );
    }

    #[tokio::test]
    async fn empty_tag_is_an_input_error() {
        let (shared, tracker, _dir) = fixture(None).await;
        assert!(matches!(
            can_install(&shared, &tracker, "").await,
            Err(StateError::EmptyTag)
        ));
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let (shared, tracker, _dir) = fixture(None).await;
        shared.set_unavailable(true);
        assert!(matches!(
            can_install(&shared, &tracker, "v1").await,
            Err(StateError::Store(_))
        ));
    }
}

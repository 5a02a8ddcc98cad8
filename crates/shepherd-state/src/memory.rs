//! In-process [`SharedState`] with the same TTL and set semantics as redis.
//!
//! Expiry is measured with `tokio::time::Instant`, so tests running on a
//! paused clock can advance past lock TTLs deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use shepherd_core::{LockName, ReleaseTag};

use crate::error::{StateError, StateResult};
use crate::store::SharedState;
use crate::types::{MemberState, RolloutProgress};

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct Inner {
    locks: HashMap<LockName, Expiring<String>>,
    stable: Option<String>,
    avoid: HashSet<String>,
    members: HashMap<String, Expiring<MemberState>>,
}

/// Ephemeral [`SharedState`] shared by clones of the same handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    inner: Arc<Mutex<Inner>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> StateResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StateError::Store("connection refused".to_string()));
        }
        Ok(())
    }

    /// Snapshot of the avoid set.
    pub async fn avoided(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut tags: Vec<String> = inner.avoid.iter().cloned().collect();
        tags.sort();
        tags
    }
}

#[async_trait]
impl SharedState for MemoryState {
    async fn try_acquire_lock(
        &self,
        lock: LockName,
        holder: &str,
        ttl: Duration,
    ) -> StateResult<bool> {
        self.check()?;
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        if inner.locks.get(&lock).is_some_and(|l| l.live(now)) {
            return Ok(false);
        }
        inner.locks.insert(
            lock,
            Expiring {
                value: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, lock: LockName) -> StateResult<()> {
        self.check()?;
        self.inner.lock().await.locks.remove(&lock);
        Ok(())
    }

    async fn lock_holder(&self, lock: LockName) -> StateResult<Option<ReleaseTag>> {
        self.check()?;
        let now = Instant::now();
        let inner = self.inner.lock().await;
        Ok(inner
            .locks
            .get(&lock)
            .filter(|l| l.live(now))
            .map(|l| l.value.clone()))
    }

    async fn stable_tag(&self) -> StateResult<Option<ReleaseTag>> {
        self.check()?;
        Ok(self.inner.lock().await.stable.clone())
    }

    async fn set_stable_tag(&self, tag: &str) -> StateResult<()> {
        self.check()?;
        if tag.is_empty() {
            return Err(StateError::EmptyTag);
        }
        self.inner.lock().await.stable = Some(tag.to_string());
        Ok(())
    }

    async fn is_avoided(&self, tag: &str) -> StateResult<bool> {
        self.check()?;
        Ok(self.inner.lock().await.avoid.contains(tag))
    }

    async fn add_avoided(&self, tag: &str) -> StateResult<()> {
        self.check()?;
        if tag.is_empty() {
            return Err(StateError::EmptyTag);
        }
        self.inner.lock().await.avoid.insert(tag.to_string());
        Ok(())
    }

    async fn publish_member(&self, member: &MemberState, ttl: Duration) -> StateResult<()> {
        self.check()?;
        let expires_at = Instant::now() + ttl;
        self.inner.lock().await.members.insert(
            member.hostname.clone(),
            Expiring {
                value: member.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn rollout_progress(&self, tag: &str) -> StateResult<RolloutProgress> {
        self.check()?;
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.members.retain(|_, m| m.live(now));
        let total = inner.members.len();
        let installed = inner
            .members
            .values()
            .filter(|m| m.value.current_version == tag)
            .count();
        Ok(RolloutProgress { installed, total })
    }
}

//! SharedState — the fleet-wide coordination store.
//!
//! Provides TTL-bound locks, the stable tag and the avoid set. Connectivity
//! failures are never retried here; they surface as [`StateError::Store`]
//! and the caller decides whether they are fatal.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use tracing::debug;

use shepherd_core::{LockName, RedisConfig, ReleaseTag};

use crate::error::{StateError, StateResult};
use crate::keys::StateKeys;
use crate::types::{MemberState, RolloutProgress};

/// Fleet-wide rollout state shared by every host.
#[async_trait]
pub trait SharedState: Send + Sync {
    /// Atomically create `lock` holding `holder` with an expiry of `ttl`.
    ///
    /// Returns true only for the caller that created the entry. Among
    /// concurrent callers at most one sees true until the lock expires or
    /// is released.
    async fn try_acquire_lock(&self, lock: LockName, holder: &str, ttl: Duration)
    -> StateResult<bool>;

    /// Delete `lock` early. Releasing an absent lock is not an error.
    async fn release_lock(&self, lock: LockName) -> StateResult<()>;

    /// Current holder tag of `lock`, if held.
    async fn lock_holder(&self, lock: LockName) -> StateResult<Option<ReleaseTag>>;

    /// Most recently validated tag, if any.
    async fn stable_tag(&self) -> StateResult<Option<ReleaseTag>>;

    async fn set_stable_tag(&self, tag: &str) -> StateResult<()>;

    async fn is_avoided(&self, tag: &str) -> StateResult<bool>;

    /// Add `tag` to the avoid set. Membership is permanent.
    async fn add_avoided(&self, tag: &str) -> StateResult<()>;

    /// Publish this host's member record for `ttl`.
    async fn publish_member(&self, member: &MemberState, ttl: Duration) -> StateResult<()>;

    /// Count live members running `tag`, pruning members whose record expired.
    async fn rollout_progress(&self, tag: &str) -> StateResult<RolloutProgress>;
}

/// Redis-backed [`SharedState`].
///
/// `MultiplexedConnection` is cheap to clone, so every call works on its
/// own handle and the store itself is `Clone` + `Send` + `Sync`.
#[derive(Clone)]
pub struct RedisState {
    conn: MultiplexedConnection,
    keys: StateKeys,
}

impl std::fmt::Debug for RedisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisState")
            .field("namespace", &self.keys.namespace())
            .finish()
    }
}

impl RedisState {
    /// Connect and verify the server answers `PING`.
    ///
    /// Accepts a `redis://` URL or a [`ConnectionInfo`], see
    /// [`connection_info`].
    pub async fn connect(info: impl IntoConnectionInfo, namespace: &str) -> StateResult<Self> {
        let client = redis::Client::open(info)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(%namespace, %pong, "shared store connected");
        Ok(Self {
            conn,
            keys: StateKeys::new(namespace),
        })
    }

    pub fn keys(&self) -> &StateKeys {
        &self.keys
    }
}

/// Connection parameters for `config`. Built field by field so the
/// password never passes through URL parsing.
pub fn connection_info(config: &RedisConfig) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: config.db,
            password: config.password.clone().filter(|p| !p.is_empty()),
            ..Default::default()
        },
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl SharedState for RedisState {
    async fn try_acquire_lock(
        &self,
        lock: LockName,
        holder: &str,
        ttl: Duration,
    ) -> StateResult<bool> {
        let key = self.keys.lock(lock);
        let mut conn = self.conn.clone();
        // SET NX PX creates the entry and its expiry in one step.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        let acquired = reply.is_some();
        debug!(%lock, %holder, acquired, ttl = ?ttl, "lock attempt");
        Ok(acquired)
    }

    async fn release_lock(&self, lock: LockName) -> StateResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.keys.lock(lock))
            .query_async(&mut conn)
            .await?;
        debug!(%lock, existed = removed > 0, "lock released");
        Ok(())
    }

    async fn lock_holder(&self, lock: LockName) -> StateResult<Option<ReleaseTag>> {
        let mut conn = self.conn.clone();
        let holder: Option<String> = redis::cmd("GET")
            .arg(self.keys.lock(lock))
            .query_async(&mut conn)
            .await?;
        Ok(holder)
    }

    async fn stable_tag(&self) -> StateResult<Option<ReleaseTag>> {
        let mut conn = self.conn.clone();
        let tag: Option<String> = redis::cmd("GET")
            .arg(&self.keys.stable)
            .query_async(&mut conn)
            .await?;
        Ok(tag.filter(|t| !t.is_empty()))
    }

    async fn set_stable_tag(&self, tag: &str) -> StateResult<()> {
        if tag.is_empty() {
            return Err(StateError::EmptyTag);
        }
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(&self.keys.stable)
            .arg(tag)
            .query_async(&mut conn)
            .await?;
        debug!(%tag, "stable tag stored");
        Ok(())
    }

    async fn is_avoided(&self, tag: &str) -> StateResult<bool> {
        let mut conn = self.conn.clone();
        let member: bool = redis::cmd("SISMEMBER")
            .arg(&self.keys.avoid)
            .arg(tag)
            .query_async(&mut conn)
            .await?;
        Ok(member)
    }

    async fn add_avoided(&self, tag: &str) -> StateResult<()> {
        if tag.is_empty() {
            return Err(StateError::EmptyTag);
        }
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(&self.keys.avoid)
            .arg(tag)
            .query_async(&mut conn)
            .await?;
        debug!(%tag, "tag added to avoid set");
        Ok(())
    }

    async fn publish_member(&self, member: &MemberState, ttl: Duration) -> StateResult<()> {
        let value =
            serde_json::to_string(member).map_err(|e| StateError::Serialize(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.keys.member(&member.hostname))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        let _: i64 = redis::cmd("SADD")
            .arg(&self.keys.members)
            .arg(&member.hostname)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn rollout_progress(&self, tag: &str) -> StateResult<RolloutProgress> {
        let mut conn = self.conn.clone();
        let hosts: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&self.keys.members)
            .query_async(&mut conn)
            .await?;

        let mut progress = RolloutProgress::default();
        for host in hosts {
            let raw: Option<String> = redis::cmd("GET")
                .arg(self.keys.member(&host))
                .query_async(&mut conn)
                .await?;
            let Some(raw) = raw else {
                let _: i64 = redis::cmd("SREM")
                    .arg(&self.keys.members)
                    .arg(&host)
                    .query_async(&mut conn)
                    .await?;
                debug!(%host, "pruned expired member");
                continue;
            };
            let member: MemberState = match serde_json::from_str(&raw) {
                Ok(m) => m,
                Err(e) => {
                    debug!(%host, error = %e, "skipping unreadable member record");
                    continue;
                }
            };
            progress.total += 1;
            if member.current_version == tag {
                progress.installed += 1;
            }
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    //! These run only against a live server named by
    //! `SHEPHERD_TEST_REDIS_URL`, e.g. `redis://127.0.0.1:6379/15`.

    use super::*;

    #[test]
    fn connection_info_keeps_password_verbatim() {
        let config = RedisConfig {
            host: "redis.internal".to_string(),
            port: 6380,
            password: Some("p@ss/w#rd?x".to_string()),
            db: 3,
            ..Default::default()
        };
        let info = connection_info(&config);
        assert_eq!(info.addr, ConnectionAddr::Tcp("redis.internal".to_string(), 6380));
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/w#rd?x"));
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.username, None);
    }

    #[test]
    fn empty_password_means_no_auth() {
        let config = RedisConfig {
            password: Some(String::new()),
            ..Default::default()
        };
        let info = connection_info(&config);
        assert_eq!(info.redis.password, None);
        assert_eq!(info.addr, ConnectionAddr::Tcp("127.0.0.1".to_string(), 6379));
        assert_eq!(info.redis.db, 0);
    }

    async fn live_store(namespace: &str) -> Option<RedisState> {
        let url = std::env::var("SHEPHERD_TEST_REDIS_URL").ok()?;
        let store = RedisState::connect(url.as_str(), namespace).await.unwrap();
        let mut conn = store.conn.clone();
        let keys = store.keys.clone();
        for key in [
            keys.stable.as_str(),
            keys.avoid.as_str(),
            keys.canary_lock.as_str(),
            keys.rollout_lock.as_str(),
            keys.members.as_str(),
        ] {
            let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await.unwrap();
        }
        Some(store)
    }

    #[tokio::test]
    async fn redis_lock_is_exclusive_until_released() {
        let Some(store) = live_store("shepherd_test_lock").await else {
            return;
        };
        let ttl = Duration::from_secs(30);

        let (a, b) = tokio::join!(
            store.try_acquire_lock(LockName::Canary, "v1", ttl),
            store.try_acquire_lock(LockName::Canary, "v2", ttl),
        );
        assert!(a.unwrap() ^ b.unwrap());

        store.release_lock(LockName::Canary).await.unwrap();
        store.release_lock(LockName::Canary).await.unwrap();
        assert!(store.try_acquire_lock(LockName::Canary, "v3", ttl).await.unwrap());
        assert_eq!(
            store.lock_holder(LockName::Canary).await.unwrap().as_deref(),
            Some("v3")
        );
    }

    #[tokio::test]
    async fn redis_lock_expires() {
        let Some(store) = live_store("shepherd_test_expiry").await else {
            return;
        };
        assert!(
            store
                .try_acquire_lock(LockName::Rollout, "v1", Duration::from_millis(50))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(
            store
                .try_acquire_lock(LockName::Rollout, "v2", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn redis_stable_and_avoid() {
        let Some(store) = live_store("shepherd_test_tags").await else {
            return;
        };
        assert_eq!(store.stable_tag().await.unwrap(), None);
        store.set_stable_tag("v2").await.unwrap();
        assert_eq!(store.stable_tag().await.unwrap().as_deref(), Some("v2"));

        assert!(!store.is_avoided("v3").await.unwrap());
        store.add_avoided("v3").await.unwrap();
        store.add_avoided("v3").await.unwrap();
        assert!(store.is_avoided("v3").await.unwrap());
    }

    #[tokio::test]
    async fn redis_member_progress() {
        let Some(store) = live_store("shepherd_test_members").await else {
            return;
        };
        let ttl = Duration::from_secs(30);
        store
            .publish_member(&MemberState::new("web-1", "v1.0.0"), ttl)
            .await
            .unwrap();
        store
            .publish_member(&MemberState::new("web-2", "v0.9.0"), ttl)
            .await
            .unwrap();

        let progress = store.rollout_progress("v1.0.0").await.unwrap();
        assert_eq!(progress, RolloutProgress { installed: 1, total: 2 });
        let progress = store.rollout_progress("non-existent-tag").await.unwrap();
        assert_eq!(progress, RolloutProgress { installed: 0, total: 2 });
    }
}

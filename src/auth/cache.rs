//! Read-through caches used by the admission pipeline.
//!
//! Entries expire after a fixed TTL and the least recently inserted entry is
//! dropped once capacity is reached. Reads take the shared lock only.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::user;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// Bounded map whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<K: Hash + Eq, V> {
    inner: RwLock<LruCache<K, Entry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let guard = self.inner.read().await;
        let entry = guard.peek(key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        self.inner.write().await.put(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.write().await.pop(key);
    }

    /// Remove every entry whose key matches `predicate`.
    pub async fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) {
        let mut guard = self.inner.write().await;
        let doomed: Vec<K> = guard
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            guard.pop(&key);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// User id → user row. Invalidated when a profile changes.
pub type UserCache = TtlCache<Uuid, user::Model>;

/// (user id, organization id) → role id held there, `None` for non-members.
///
/// Invalidated on any membership or role change.
pub type MembershipCache = TtlCache<(Uuid, Uuid), Option<Uuid>>;

impl MembershipCache {
    pub async fn invalidate_membership(&self, user_id: Uuid, organization_id: Uuid) {
        self.invalidate(&(user_id, organization_id)).await;
    }

    pub async fn invalidate_organization(&self, organization_id: Uuid) {
        self.invalidate_where(|(_, org)| *org == organization_id)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache: TtlCache<u32, &str> = TtlCache::new(4, Duration::from_millis(20));
        cache.insert(1, "one").await;
        assert_eq!(cache.get(&1).await, Some("one"));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get(&1).await, None);
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache: TtlCache<u32, u32> = TtlCache::new(2, Duration::from_secs(60));
        for i in 0..3 {
            cache.insert(i, i).await;
        }
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(&0).await, None);
        assert_eq!(cache.get(&2).await, Some(2));
    }

    #[tokio::test]
    async fn organization_invalidation_only_touches_that_org() {
        let cache = MembershipCache::new(16, Duration::from_secs(60));
        let (user, org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.insert((user, org_a), Some(Uuid::new_v4())).await;
        cache.insert((user, org_b), None).await;

        cache.invalidate_organization(org_a).await;

        assert_eq!(cache.get(&(user, org_a)).await, None);
        assert_eq!(cache.get(&(user, org_b)).await, Some(None));
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache: TtlCache<u32, u32> = TtlCache::new(2, Duration::ZERO);
        cache.insert(1, 1).await;
        assert!(cache.is_empty().await);
    }
}

//! In-memory cache of verified API keys, keyed by key hash.
//!
//! Lookups take the read lock; inserts, invalidations and the periodic sweep
//! take the write lock. A cached record is returned only while both the cache
//! entry and the key itself are still valid.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ApiKeyCacheConfig;
use crate::models::api_key;

#[derive(Debug, Clone)]
struct CachedKey {
    record: api_key::Model,
    cached_until: DateTime<Utc>,
}

impl CachedKey {
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.cached_until > now && self.record.is_valid(now.into())
    }
}

#[derive(Debug)]
pub struct ApiKeyCache {
    entries: RwLock<HashMap<String, CachedKey>>,
    ttl: Duration,
    max_entries: usize,
}

impl ApiKeyCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &ApiKeyCacheConfig) -> Self {
        Self::new(
            Duration::seconds(config.ttl_seconds as i64),
            config.max_entries,
        )
    }

    pub async fn get(&self, key_hash: &str) -> Option<api_key::Model> {
        self.get_at(key_hash, Utc::now()).await
    }

    pub async fn get_at(&self, key_hash: &str, now: DateTime<Utc>) -> Option<api_key::Model> {
        let entries = self.entries.read().await;
        let hit = entries
            .get(key_hash)
            .filter(|cached| cached.is_usable(now))
            .map(|cached| cached.record.clone());
        if hit.is_some() {
            metrics::counter!("api_key_cache_hits_total").increment(1);
        } else {
            metrics::counter!("api_key_cache_misses_total").increment(1);
        }
        hit
    }

    pub async fn insert(&self, record: api_key::Model) {
        self.insert_at(record, Utc::now()).await;
    }

    /// Cache `record` unless it is already invalid.
    pub async fn insert_at(&self, record: api_key::Model, now: DateTime<Utc>) {
        if !record.is_valid(now.into()) || self.ttl <= Duration::zero() {
            return;
        }

        let mut cached_until = now + self.ttl;
        if let Some(expires_at) = record.expires_at {
            cached_until = cached_until.min(expires_at.with_timezone(&Utc));
        }

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(&record.key_hash) {
            evict_round(&mut entries, now, self.max_entries);
        }
        entries.insert(
            record.key_hash.clone(),
            CachedKey {
                record,
                cached_until,
            },
        );
    }

    pub async fn invalidate_hash(&self, key_hash: &str) {
        self.entries.write().await.remove(key_hash);
    }

    pub async fn invalidate_key(&self, key_id: Uuid) {
        self.entries
            .write()
            .await
            .retain(|_, cached| cached.record.id != key_id);
    }

    pub async fn invalidate_user(&self, user_id: Uuid) {
        self.entries
            .write()
            .await
            .retain(|_, cached| cached.record.user_id != user_id);
    }

    /// Drop expired and invalid entries. Returns how many were removed.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cached| cached.is_usable(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: std::time::Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep_at(Utc::now()).await;
                        if removed > 0 {
                            tracing::debug!(removed, "swept api key cache");
                        }
                    }
                }
            }
        })
    }
}

/// One eviction round: drop unusable entries, then the entries closest to
/// expiry until there is room for one more.
fn evict_round(entries: &mut HashMap<String, CachedKey>, now: DateTime<Utc>, max_entries: usize) {
    entries.retain(|_, cached| cached.is_usable(now));
    if entries.len() < max_entries {
        return;
    }

    let overflow = entries.len() + 1 - max_entries;
    let mut by_expiry: Vec<(DateTime<Utc>, String)> = entries
        .iter()
        .map(|(hash, cached)| (cached.cached_until, hash.clone()))
        .collect();
    by_expiry.sort();
    for (_, hash) in by_expiry.into_iter().take(overflow) {
        entries.remove(&hash);
    }
}

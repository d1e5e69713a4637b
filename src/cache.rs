//! Two-tier cache.
//!
//! L1 is a bounded in-process `moka` cache whose entries live for
//! `min(ttl, l1_ttl)`. L2 is a [`RemoteStore`], normally Redis, keyed under a
//! shared prefix. Values are JSON text in both tiers.
//!
//! The cache is best-effort: remote failures are logged and read as misses.

use async_trait::async_trait;
use moka::{future::Cache, Expiry};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::CacheConfig;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Remote key-value tier.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Delete keys matching a glob pattern (`*` wildcard). Returns the count.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
    /// Increment a counter, starting a `window` expiry on its first hit.
    async fn incr(&self, key: &str, window: Duration) -> Result<u64, CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

/// Redis tier over a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await?;
                deleted += removed;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(deleted)
    }

    async fn incr(&self, key: &str, window: Duration) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1u64).await?;
        if count == 1 {
            let _: () = conn.expire(key, window.as_secs().max(1) as i64).await?;
        }
        Ok(count)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-process stand-in for Redis when no URL is configured.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Translate a Redis glob (`*` only) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, CacheError> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Ok(regex::Regex::new(&format!("^{escaped}$"))?)
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let matcher = glob_to_regex(pattern)?;
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let before = entries.len();
        entries.retain(|key, _| !matcher.is_match(key));
        Ok((before - entries.len()) as u64)
    }

    async fn incr(&self, key: &str, window: Duration) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let now = Instant::now();
        let (count, expires) = match entries.get(key) {
            Some((value, expires)) if *expires > now => (value.parse::<u64>().unwrap_or(0) + 1, *expires),
            _ => (1, now + window),
        };
        entries.insert(key.to_string(), (count.to_string(), expires));
        Ok(count)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[derive(Clone)]
struct L1Entry {
    value: Arc<String>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, L1Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &L1Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// L1 + L2 cache shared through application state.
#[derive(Clone)]
pub struct TieredCache {
    l1: Cache<String, L1Entry>,
    l2: Arc<dyn RemoteStore>,
    prefix: String,
    l1_ttl: Duration,
    l2_ttl: Duration,
}

impl TieredCache {
    pub fn new(config: &CacheConfig, remote: Arc<dyn RemoteStore>) -> Self {
        let l1 = Cache::builder()
            .max_capacity(config.l1_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            l1,
            l2: remote,
            prefix: config.key_prefix.clone(),
            l1_ttl: Duration::from_secs(config.l1_ttl_secs),
            l2_ttl: Duration::from_secs(config.l2_ttl_secs),
        }
    }

    fn remote_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn l1_entry(&self, value: String, ttl: Duration) -> L1Entry {
        L1Entry {
            value: Arc::new(value),
            ttl: ttl.min(self.l1_ttl),
        }
    }

    /// Raw JSON lookup. L2 hits are promoted into L1.
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.l1.get(key).await {
            return Some(entry.value.as_ref().clone());
        }
        match self.l2.get(&self.remote_key(key)).await {
            Ok(Some(value)) => {
                tracing::debug!(key, "Cache L2 hit");
                self.l1
                    .insert(key.to_string(), self.l1_entry(value.clone(), self.l2_ttl))
                    .await;
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache L2 read failed");
                None
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable cache entry");
                self.delete(key).await;
                None
            }
        }
    }

    /// Write both tiers. `ttl` defaults to the L2 TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache value not serializable");
                return;
            }
        };
        let ttl = ttl.unwrap_or(self.l2_ttl);
        self.l1
            .insert(key.to_string(), self.l1_entry(raw.clone(), ttl))
            .await;
        if let Err(e) = self.l2.set(&self.remote_key(key), &raw, ttl).await {
            tracing::warn!(key, error = %e, "Cache L2 write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        self.l1.invalidate(key).await;
        if let Err(e) = self.l2.delete(&self.remote_key(key)).await {
            tracing::warn!(key, error = %e, "Cache L2 delete failed");
        }
    }

    /// Remove every key matching `pattern` from both tiers.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        if let Ok(matcher) = glob_to_regex(pattern) {
            let doomed: Vec<String> = self
                .l1
                .iter()
                .filter(|(key, _)| matcher.is_match(key))
                .map(|(key, _)| key.as_ref().clone())
                .collect();
            for key in doomed {
                self.l1.invalidate(&key).await;
            }
        }
        match self.l2.delete_pattern(&self.remote_key(pattern)).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Cache L2 pattern delete failed");
                0
            }
        }
    }

    /// Fixed-window counter kept in the remote tier only, outside the cache prefix.
    pub async fn incr_counter(&self, key: &str, window: Duration) -> Result<u64, CacheError> {
        self.l2.incr(key, window).await
    }

    /// Health of the remote tier.
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.l2.ping().await
    }

    #[cfg(test)]
    pub(crate) async fn l1_contains(&self, key: &str) -> bool {
        self.l1.get(key).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        budget: f64,
    }

    fn sample() -> Sample {
        Sample {
            name: "Pont Champlain".to_string(),
            budget: 1_250_000.0,
        }
    }

    fn cache_with(remote: Arc<MemoryStore>) -> TieredCache {
        TieredCache::new(&CacheConfig::default(), remote)
    }

    #[tokio::test]
    async fn set_then_get_round_trips_json() {
        let cache = cache_with(Arc::new(MemoryStore::new()));
        cache.set("project:1", &sample(), None).await;

        let loaded: Option<Sample> = cache.get("project:1").await;
        assert_eq!(loaded, Some(sample()));
    }

    #[tokio::test]
    async fn writes_land_in_remote_under_prefix() {
        let remote = Arc::new(MemoryStore::new());
        let cache = cache_with(remote.clone());
        cache.set("project:1", &sample(), None).await;

        assert!(remote.get("cache:project:1").await.unwrap().is_some());
        assert!(remote.get("project:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn l2_hit_is_promoted_to_l1() {
        let remote = Arc::new(MemoryStore::new());
        let cache = cache_with(remote.clone());
        let raw = serde_json::to_string(&sample()).unwrap();
        remote
            .set("cache:project:7", &raw, Duration::from_secs(300))
            .await
            .unwrap();

        assert!(!cache.l1_contains("project:7").await);
        let loaded: Option<Sample> = cache.get("project:7").await;
        assert_eq!(loaded, Some(sample()));
        assert!(cache.l1_contains("project:7").await);
    }

    #[tokio::test]
    async fn delete_removes_both_tiers() {
        let remote = Arc::new(MemoryStore::new());
        let cache = cache_with(remote.clone());
        cache.set("project:1", &sample(), None).await;

        cache.delete("project:1").await;

        assert!(!cache.l1_contains("project:1").await);
        assert!(remote.get("cache:project:1").await.unwrap().is_none());
        assert!(cache.get::<Sample>("project:1").await.is_none());
    }

    #[tokio::test]
    async fn delete_pattern_clears_matching_keys() {
        let remote = Arc::new(MemoryStore::new());
        let cache = cache_with(remote.clone());
        cache.set("project:1", &sample(), None).await;
        cache.set("project:2", &sample(), None).await;
        cache.set("user:1", &sample(), None).await;

        let removed = cache.delete_pattern("project:*").await;

        assert_eq!(removed, 2);
        assert!(cache.get::<Sample>("project:1").await.is_none());
        assert!(cache.get::<Sample>("user:1").await.is_some());
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_millis(0)).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_counter_resets_after_window() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("ratelimit:a", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(store.incr("ratelimit:a", Duration::from_secs(60)).await.unwrap(), 2);

        store.incr("ratelimit:b", Duration::from_millis(0)).await.unwrap();
        assert_eq!(store.incr("ratelimit:b", Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[test]
    fn glob_matches_prefix_wildcards() {
        let re = glob_to_regex("cache:project:*").unwrap();
        assert!(re.is_match("cache:project:42"));
        assert!(!re.is_match("cache:user:42"));
        assert!(!glob_to_regex("a.b").unwrap().is_match("axb"));
    }
}

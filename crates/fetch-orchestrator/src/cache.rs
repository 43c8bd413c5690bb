use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use dashboard_core::{Clock, KeyValueStore};

/// Fast-tier entry, stamped at write or promotion time.
struct CacheEntry<T> {
    data: T,
    stored_at: DateTime<Utc>,
}

/// Expiry policy and storage namespace for one cache family.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub prefix: &'static str,
    pub fast_ttl: Duration,
    pub slow_ttl: Duration,
}

impl CachePolicy {
    pub fn new(prefix: &'static str, fast_ttl: Duration, slow_ttl: Duration) -> Self {
        // Promotion is only meaningful when the slow tier outlives the fast.
        debug_assert!(slow_ttl >= fast_ttl);
        Self {
            prefix,
            fast_ttl,
            slow_ttl,
        }
    }
}

/// Persistent-tier layout: `{ "data": ..., "timestamp": millis }`.
#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
    data: T,
    timestamp: i64,
}

/// Two-tier TTL cache: an in-process fast tier over a persistent slow
/// tier, with slow-to-fast promotion on hit. Expired entries are removed
/// on read, never returned.
pub struct TieredCache<T> {
    policy: CachePolicy,
    fast: DashMap<String, CacheEntry<T>>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl<T> TieredCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new(policy: CachePolicy, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            fast: DashMap::new(),
            store,
            clock,
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.policy.prefix, key)
    }

    /// Fast tier first, then the slow tier with promotion.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();

        if let Some(entry) = self.fast.get(key) {
            let age_ms = (now - entry.stored_at).num_milliseconds();
            if age_ms < self.policy.fast_ttl.as_millis() as i64 {
                tracing::debug!("fast cache hit: {key}");
                return Some(entry.data.clone());
            }
            drop(entry);
            self.fast.remove(key);
        }

        let storage_key = self.storage_key(key);
        let stored = match self.store.load(&storage_key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("slow cache read failed for {key}: {e}");
                return None;
            }
        };

        let entry: StoredEntry<T> = match serde_json::from_str(&stored) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("discarding corrupt slow cache entry for {key}: {e}");
                self.store.remove(&storage_key);
                return None;
            }
        };

        let age_ms = now.timestamp_millis() - entry.timestamp;
        if age_ms >= self.policy.slow_ttl.as_millis() as i64 {
            self.store.remove(&storage_key);
            return None;
        }

        tracing::debug!("slow cache hit: {key}, promoting");
        self.fast.insert(
            key.to_string(),
            CacheEntry {
                data: entry.data.clone(),
                stored_at: now,
            },
        );
        Some(entry.data)
    }

    /// Write both tiers, stamped now. A slow-tier failure is logged and
    /// swallowed: the fast-tier write is the one that matters within a
    /// session.
    pub fn put(&self, key: &str, value: T) {
        let now = self.clock.now();

        let stored = StoredEntry {
            data: value.clone(),
            timestamp: now.timestamp_millis(),
        };
        match serde_json::to_string(&stored) {
            Ok(text) => {
                if let Err(e) = self.store.save(&self.storage_key(key), &text) {
                    tracing::warn!("slow cache write failed for {key}: {e}");
                }
            }
            Err(e) => tracing::warn!("slow cache serialize failed for {key}: {e}"),
        }

        self.fast.insert(
            key.to_string(),
            CacheEntry {
                data: value,
                stored_at: now,
            },
        );
    }

    /// Drop both tiers' entries for a key.
    pub fn remove(&self, key: &str) {
        self.fast.remove(key);
        self.store.remove(&self.storage_key(key));
    }
}

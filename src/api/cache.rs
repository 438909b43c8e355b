//! In-memory cache for GET responses.
//!
//! Entries are keyed by `METHOD:path:user` and expire after a per-entry TTL.
//! Writes to a resource class invalidate every key under its prefix, and a
//! background task purges expired entries so readers never do maintenance.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Key prefixes for each cached resource class
pub mod prefixes {
    pub const PATIENTS: &str = "GET:/api/patients";
    pub const THERAPY_SERIES: &str = "GET:/api/therapy-series";
    pub const DASHBOARD: &str = "GET:/api/dashboard";
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted) >= self.ttl
    }
}

/// Thread-safe response cache using dashmap
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a GET of `path` on behalf of `user_id`
    pub fn key(path: &str, user_id: &str) -> String {
        format!("GET:{}:{}", path, user_id)
    }

    /// Fresh value for `key`; expired entries read as misses
    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: String, value: Value, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        tracing::debug!(prefix, "Cache invalidated");
    }

    /// Remove expired entries
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawn a background task to periodically purge expired cache entries
pub fn spawn_cleanup_task(cache: Arc<ResponseCache>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            cache.purge_expired();
            tracing::debug!("Cache cleanup complete, {} entries remaining", cache.len());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new();
        let key = ResponseCache::key("/api/patients", "u1");
        cache.set(key.clone(), json!([1, 2]), Duration::from_secs(300));

        assert_eq!(cache.get(&key), Some(json!([1, 2])));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_keys_are_per_user() {
        let cache = ResponseCache::new();
        cache.set(ResponseCache::key("/api/patients", "u1"), json!("a"), Duration::from_secs(60));

        assert!(cache.get(&ResponseCache::key("/api/patients", "u2")).is_none());
        assert_eq!(cache.get("GET:/api/patients:u1"), Some(json!("a")));
    }

    #[test]
    fn test_invalidate_prefix() {
        let cache = ResponseCache::new();
        let ttl = Duration::from_secs(60);
        cache.set(ResponseCache::key("/api/patients", "u1"), json!(1), ttl);
        cache.set(ResponseCache::key("/api/patients", "u2"), json!(2), ttl);
        cache.set(ResponseCache::key("/api/therapy-series", "u1"), json!(3), ttl);

        cache.invalidate_prefix(prefixes::PATIENTS);

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&ResponseCache::key("/api/therapy-series", "u1")).is_some());
    }

    #[test]
    fn test_handler_keys_fall_under_their_prefix() {
        let cases = [
            ("/api/patients", prefixes::PATIENTS),
            ("/api/therapy-series", prefixes::THERAPY_SERIES),
            ("/api/dashboard/analytics", prefixes::DASHBOARD),
        ];
        for (path, prefix) in cases {
            assert!(ResponseCache::key(path, "u1").starts_with(prefix), "{}", path);
        }

        // The therapy-type catalog is static and only expires by TTL
        let catalog = ResponseCache::key("/api/therapy-types", "u1");
        for prefix in [prefixes::PATIENTS, prefixes::THERAPY_SERIES, prefixes::DASHBOARD] {
            assert!(!catalog.starts_with(prefix));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_keeps_fresh_entries() {
        let cache = ResponseCache::new();
        cache.set("short".to_string(), json!(1), Duration::from_secs(10));
        cache.set("long".to_string(), json!(2), Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.purge_expired();

        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_purges() {
        let cache = Arc::new(ResponseCache::new());
        cache.set("k".to_string(), json!(1), Duration::from_secs(5));
        spawn_cleanup_task(cache.clone(), 10);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.is_empty());
    }
}

//! Cross-unit-of-work key/value cache.
//!
//! Shared by every unit of work of a runtime and safe for concurrent use.
//! Values are JSON so an out-of-process backend can store them verbatim.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::remote::RedisCache;

/// A concurrent key/value store with optional per-entry expiry.
pub trait SharedCache: Send + Sync + std::fmt::Debug {
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Store a value, expiring after `ttl` when given.
    fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>);

    fn delete(&self, key: &str);

    /// Atomically add one to the integer stored at `key` (absent counts as
    /// zero) and return the new value; `None` when the backend failed.
    fn incr(&self, key: &str) -> Option<i64>;

    /// Delete every key starting with `prefix`.
    fn delete_prefix(&self, prefix: &str);

    fn clear(&self);
}

#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// In-process [`SharedCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SharedCache for MemoryCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired());
            return None;
        }
        Some(entry.value.clone())
    }

    fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn incr(&self, key: &str) -> Option<i64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: serde_json::Value::from(0),
            expires_at: None,
        });
        let next = if entry.is_expired() {
            1
        } else {
            entry.value.as_i64().unwrap_or_default() + 1
        };
        *entry = Entry {
            value: serde_json::Value::from(next),
            expires_at: None,
        };
        Some(next)
    }

    fn delete_prefix(&self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Open the shared cache named by `url`.
///
/// `memory://` keeps entries in this process. `redis://` and `rediss://`
/// share them with every process pointed at the same server. An unknown
/// scheme or an unreachable server logs a warning and falls back to an
/// in-process cache so the runtime still starts.
pub fn open_shared_cache(url: &str) -> Arc<dyn SharedCache> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        match RedisCache::connect(url) {
            Ok(cache) => {
                tracing::info!(url, "shared cache connected");
                return Arc::new(cache);
            }
            Err(err) => {
                tracing::warn!(url, error = %err, "shared cache unreachable, using in-process cache");
            }
        }
    } else if !url.starts_with("memory://") {
        tracing::warn!(url, "unknown shared cache backend, using in-process cache");
    }
    Arc::new(MemoryCache::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("nexo:groups:2", json!([1, 3]), None);
        assert_eq!(cache.get("nexo:groups:2"), Some(json!([1, 3])));
        cache.delete("nexo:groups:2");
        assert_eq!(cache.get("nexo:groups:2"), None);
    }

    #[test]
    fn test_expiry() {
        let cache = MemoryCache::new();
        cache.set("k", json!(true), Some(Duration::ZERO));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_prefix() {
        let cache = MemoryCache::new();
        cache.set("nexo:groups:1", json!([]), None);
        cache.set("nexo:groups:2", json!([]), None);
        cache.set("other", json!(1), None);
        cache.delete_prefix("nexo:groups:");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_incr_counts_from_zero() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("nexo:security:generation"), Some(1));
        assert_eq!(cache.incr("nexo:security:generation"), Some(2));
        assert_eq!(cache.get("nexo:security:generation"), Some(json!(2)));

        cache.set("expired", json!(41), Some(Duration::ZERO));
        assert_eq!(cache.incr("expired"), Some(1));
    }

    #[test]
    fn test_unknown_backend_falls_back() {
        let cache = open_shared_cache("memcached://localhost:11211");
        cache.set("k", json!(1), None);
        assert_eq!(cache.get("k"), Some(json!(1)));
    }

    #[test]
    fn test_unreachable_redis_falls_back() {
        // Port 1 is never a redis server.
        let cache = open_shared_cache("redis://127.0.0.1:1/0");
        cache.set("k", json!(1), None);
        assert_eq!(cache.get("k"), Some(json!(1)));
    }
}

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Deterministic cache key: `<kind>:<sha256 of input>`.
pub fn cache_key(kind: &str, input: &str) -> String {
    format!("{}:{:x}", kind, Sha256::digest(input.as_bytes()))
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Process-wide key/value cache with a fixed time-to-live per entry.
///
/// Expired entries are dropped lazily when read. There is no eviction policy
/// and no partial invalidation: `clear` wipes everything.
#[derive(Default)]
pub struct TtlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            debug!("Cache entry expired: {}", key);
            entries.remove(key);
        }
        None
    }

    pub async fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drops every entry and returns how many were held.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    /// Number of entries that have not expired yet.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_stable_and_kind_scoped() {
        let a = cache_key("select", "SELECT 1");
        assert_eq!(a, cache_key("select", "SELECT 1"));
        assert_ne!(a, cache_key("select", "SELECT 2"));
        assert_ne!(a, cache_key("analyze", "SELECT 1"));
        assert!(a.starts_with("select:"));
        assert_eq!(a.len(), "select:".len() + 64);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let cache = TtlCache::new();
        cache.set("k", json!([1, 2]), Duration::from_secs(10)).await;

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("k").await, Some(json!([1, 2])));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn last_write_wins_and_clear_drops_everything() {
        let cache = TtlCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("a", json!("first"), ttl).await;
        cache.set("a", json!("second"), ttl).await;
        cache.set("b", json!(2), ttl).await;

        assert_eq!(cache.get("a").await, Some(json!("second")));
        assert_eq!(cache.len().await, 2);

        assert_eq!(cache.clear().await, 2);
        assert_eq!(cache.get("b").await, None);
        assert!(!cache.remove("a").await);
    }
}

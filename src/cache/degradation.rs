//! Staleness-aware keyed cache with a fallback registry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::CacheConfig;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    stored_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.age(now) > self.ttl
    }

    fn is_evictable(&self, now: Instant, retention: Duration) -> bool {
        self.age(now) > self.ttl + retention
    }
}

/// A cached value and whether it is past its TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit<T> {
    pub data: T,
    pub stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh: usize,
    pub stale: usize,
    pub fallbacks: usize,
}

/// Keyed TTL cache that keeps stale entries for degraded operation.
#[derive(Debug)]
pub struct DegradationCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    fallbacks: DashMap<String, T>,
    default_ttl: Duration,
    stale_retention: Duration,
}

impl<T: Clone> DegradationCache<T> {
    pub fn new(default_ttl: Duration, stale_retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            fallbacks: DashMap::new(),
            default_ttl,
            stale_retention,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.default_ttl(), config.stale_retention())
    }

    /// Store `data` under `key`; `None` uses the default TTL.
    pub fn set(&self, key: &str, data: T, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    /// Look up `key`. Entries past `ttl + stale_retention` are evicted and
    /// reported as missing.
    pub fn get(&self, key: &str) -> Option<CacheHit<T>> {
        let now = Instant::now();
        let hit = {
            let entry = self.entries.get(key)?;
            if entry.is_evictable(now, self.stale_retention) {
                None
            } else {
                Some(CacheHit {
                    data: entry.data.clone(),
                    stale: entry.is_stale(now),
                })
            }
        };
        if hit.is_none() {
            self.evict_expired(key, now);
        }
        hit
    }

    /// Drop `key` only if it is still expired; a concurrent `set` wins.
    fn evict_expired(&self, key: &str, now: Instant) {
        let retention = self.stale_retention;
        self.entries.remove_if(key, |_, entry| entry.is_evictable(now, retention));
    }

    /// Fresh value, or a stale one only when `allow_stale` is set.
    pub fn lookup(&self, key: &str, allow_stale: bool) -> Option<CacheHit<T>> {
        self.get(key).filter(|hit| !hit.stale || allow_stale)
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evict entries older than `ttl + retention`. Returns how many were removed.
    pub fn cleanup(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_evictable(now, retention));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.entries.len(), "Evicted stale cache entries");
        }
        evicted
    }

    /// Register a default served when no cache entry exists at all.
    pub fn register_fallback(&self, key: &str, data: T) {
        self.fallbacks.insert(key.to_string(), data);
    }

    pub fn fallback(&self, key: &str) -> Option<T> {
        self.fallbacks.get(key).map(|r| r.value().clone())
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let stale = self.entries.iter().filter(|r| r.value().is_stale(now)).count();
        CacheStats {
            entries: self.entries.len(),
            fresh: self.entries.len().saturating_sub(stale),
            stale,
            fallbacks: self.fallbacks.len(),
        }
    }

    pub fn stale_retention(&self) -> Duration {
        self.stale_retention
    }
}

impl<T: Clone + Send + Sync + 'static> DegradationCache<T> {
    /// Sweep on a fixed interval until shutdown.
    pub async fn run_cleanup(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup(self.stale_retention);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache cleanup received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> DegradationCache<String> {
        DegradationCache::new(Duration::from_secs(60), Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_then_stale_then_gone() {
        let cache = cache();
        cache.set("providers", "v".to_string(), Some(Duration::from_millis(100)));

        assert_eq!(
            cache.get("providers"),
            Some(CacheHit { data: "v".to_string(), stale: false })
        );

        time::advance(Duration::from_millis(150)).await;
        assert_eq!(
            cache.get("providers"),
            Some(CacheHit { data: "v".to_string(), stale: true })
        );

        time::advance(Duration::from_millis(500)).await;
        assert_eq!(cache.get("providers"), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_spares_a_rewritten_entry() {
        let cache = cache();
        cache.set("providers", "old".to_string(), Some(Duration::from_millis(100)));
        time::advance(Duration::from_millis(700)).await;
        let now = Instant::now();

        cache.set("providers", "new".to_string(), Some(Duration::from_millis(100)));
        cache.evict_expired("providers", now);

        assert_eq!(
            cache.get("providers"),
            Some(CacheHit { data: "new".to_string(), stale: false })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_hides_stale_unless_allowed() {
        let cache = cache();
        cache.set("k", "v".to_string(), Some(Duration::from_millis(10)));
        time::advance(Duration::from_millis(20)).await;

        assert!(cache.lookup("k", false).is_none());
        assert!(cache.lookup("k", true).unwrap().stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_evicts_past_retention() {
        let cache = cache();
        cache.set("old", "a".to_string(), Some(Duration::from_millis(10)));
        cache.set("new", "b".to_string(), None);
        time::advance(Duration::from_secs(1)).await;

        assert_eq!(cache.stats(), CacheStats { entries: 2, fresh: 1, stale: 1, fallbacks: 0 });
        assert_eq!(cache.cleanup(Duration::from_millis(500)), 1);
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_fallback_registry_is_independent() {
        let cache = cache();
        cache.register_fallback("providers", "email".to_string());
        assert!(cache.get("providers").is_none());
        assert_eq!(cache.fallback("providers").as_deref(), Some("email"));

        cache.clear();
        assert_eq!(cache.stats().fallbacks, 1);
    }
}

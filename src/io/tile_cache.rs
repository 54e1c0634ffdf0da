//! Fast, volatile tile tier.
//!
//! Holds encoded tile bytes keyed by the canonical tile key string. Entries may
//! be evicted at any time; the durable store stays the authority. Values are
//! immutable `Bytes`, so overwriting a key never disturbs a reader holding the
//! previous value.

use crate::error::Result;
use bytes::Bytes;
use lru::LruCache;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Best-effort key/value tier in front of the durable store.
pub trait FastTier: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Store `value` under `key`. Implementations may drop it silently.
    fn put(&self, key: &str, value: Bytes) -> impl Future<Output = Result<()>> + Send;
}

/// One tier shared by the caches of several layers.
impl<T: FastTier> FastTier for Arc<T> {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: Bytes) -> impl Future<Output = Result<()>> + Send {
        (**self).put(key, value)
    }
}

/// In-process LRU tier bounded by total bytes.
pub struct MemoryTier {
    cache: Mutex<LruCache<String, Bytes>>,

    /// Maximum cache size in bytes
    max_bytes: u64,

    /// Current cache size in bytes
    current_bytes: AtomicU64,
}

impl MemoryTier {
    /// Create a tier holding at most `max_bytes` of keys and values.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            cache: Mutex::new(LruCache::unbounded()),
            max_bytes,
            current_bytes: AtomicU64::new(0),
        }
    }

    /// A tier that stores nothing and always misses.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_bytes > 0
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.lock().await;
        cache.clear();
        self.current_bytes.store(0, Ordering::Relaxed);
    }

    fn entry_size(key: &str, value: &Bytes) -> u64 {
        (key.len() + value.len()) as u64
    }

    /// Evict LRU entries until `incoming` more bytes fit.
    fn evict_if_needed(&self, cache: &mut LruCache<String, Bytes>, incoming: u64) {
        while self.current_bytes.load(Ordering::Relaxed) + incoming > self.max_bytes {
            match cache.pop_lru() {
                Some((key, evicted)) => {
                    let size = Self::entry_size(&key, &evicted);
                    self.current_bytes.fetch_sub(size, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }
}

impl FastTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let mut cache = self.cache.lock().await;
        Ok(cache.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let size = Self::entry_size(key, &value);
        if size > self.max_bytes {
            if self.is_enabled() {
                tracing::debug!("Not caching {}: {} bytes exceeds tier budget", key, size);
            }
            return Ok(());
        }

        let mut cache = self.cache.lock().await;
        if let Some(previous) = cache.pop(key) {
            self.current_bytes
                .fetch_sub(Self::entry_size(key, &previous), Ordering::Relaxed);
        }
        self.evict_if_needed(&mut cache, size);
        cache.put(key.to_string(), value);
        self.current_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(size: usize) -> Bytes {
        Bytes::from(vec![7u8; size])
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let tier = MemoryTier::new(1024 * 1024);
        tier.put("a", value(1000)).await.unwrap();

        let hit = tier.get("a").await.unwrap().unwrap();
        assert_eq!(hit.len(), 1000);
        assert!(tier.get("b").await.unwrap().is_none());
        assert_eq!(tier.current_bytes(), 1001);
    }

    #[tokio::test]
    async fn test_cache_eviction() {
        let tier = MemoryTier::new(2000);
        tier.put("k1", value(800)).await.unwrap();
        tier.put("k2", value(800)).await.unwrap();

        // Touch k1 so k2 becomes least recently used
        assert!(tier.get("k1").await.unwrap().is_some());
        tier.put("k3", value(800)).await.unwrap();

        assert!(tier.current_bytes() <= 2000);
        assert!(tier.get("k1").await.unwrap().is_some());
        assert!(tier.get("k2").await.unwrap().is_none());
        assert!(tier.get("k3").await.unwrap().is_some());
        assert_eq!(tier.len().await, 2);
    }

    #[tokio::test]
    async fn test_overwrite_same_key() {
        let tier = MemoryTier::new(10_000);
        tier.put("k", value(100)).await.unwrap();
        let first = tier.get("k").await.unwrap().unwrap();
        tier.put("k", Bytes::from(vec![1u8; 300])).await.unwrap();

        // Earlier readers keep their snapshot
        assert_eq!(first.len(), 100);
        assert_eq!(tier.get("k").await.unwrap().unwrap()[0], 1);
        assert_eq!(tier.current_bytes(), 301);
        assert_eq!(tier.len().await, 1);
    }

    #[tokio::test]
    async fn test_oversized_entry_skipped() {
        let tier = MemoryTier::new(500);
        tier.put("small", value(100)).await.unwrap();
        tier.put("big", value(1000)).await.unwrap();

        assert!(tier.get("big").await.unwrap().is_none());
        assert!(tier.get("small").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disabled_tier() {
        let tier = MemoryTier::disabled();
        assert!(!tier.is_enabled());
        tier.put("k", value(10)).await.unwrap();
        assert!(tier.get("k").await.unwrap().is_none());
        assert!(tier.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear() {
        let tier = MemoryTier::new(10_000);
        tier.put("a", value(10)).await.unwrap();
        tier.put("b", value(10)).await.unwrap();
        tier.clear().await;
        assert!(tier.is_empty().await);
        assert_eq!(tier.current_bytes(), 0);
    }

    #[tokio::test]
    async fn test_shared_tier() {
        let tier = Arc::new(MemoryTier::new(10_000));
        let other = tier.clone();
        FastTier::put(&tier, "a", value(10)).await.unwrap();
        assert!(FastTier::get(&other, "a").await.unwrap().is_some());
        assert_eq!(other.current_bytes(), 11);
    }
}

//! Tile resolution through a fast tier, then the durable store.
//!
//! Lookup order: fast tier, durable store, then an all-zero tile of the
//! requested size. A durable hit is written back to the fast tier; a failed
//! write-back is logged and counted but never fails the read. The read path
//! never writes to the durable store.
//!
//! Concurrent lookups of one key share a single durable fetch. If the task
//! doing the fetch is cancelled, its in-flight slot is released and waiting
//! tasks fetch for themselves.

use super::store::DurableStore;
use super::tile_cache::FastTier;
use crate::config::RetryConfig;
use crate::error::Result;
use crate::index::{TileAddress, TileGrid, TileKey};
use crate::pipeline::Metrics;
use crate::raster::{ArrayRaster, EmptyRaster, Raster};
use crate::transform::TileSource;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

type Inflight = DashMap<String, broadcast::Sender<Arc<dyn Raster>>>;

/// Releases an in-flight registration, notifying waiters on completion.
struct InflightGuard<'a> {
    map: &'a Inflight,
    key: &'a str,
    done: bool,
}

impl InflightGuard<'_> {
    fn complete(mut self, tile: &Arc<dyn Raster>) {
        if let Some((_, tx)) = self.map.remove(self.key) {
            let _ = tx.send(tile.clone());
        }
        self.done = true;
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            // Dropping the sender wakes waiters with a closed channel
            self.map.remove(self.key);
        }
    }
}

/// Tile source for one parent raster, backed by a fast tier and a durable store.
pub struct TieredCache<F, D> {
    parent: String,
    grid: TileGrid,
    fast: F,
    durable: D,
    in_flight: Inflight,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<F: FastTier, D: DurableStore> TieredCache<F, D> {
    pub fn new(parent: impl Into<String>, grid: TileGrid, fast: F, durable: D) -> Self {
        Self {
            parent: parent.into(),
            grid,
            fast,
            durable,
            in_flight: DashMap::new(),
            retry: RetryConfig::default(),
            metrics: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn fast_tier(&self) -> &F {
        &self.fast
    }

    pub fn durable_store(&self) -> &D {
        &self.durable
    }

    /// Number of keys currently being fetched.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Canonical key of the tile at `address`.
    pub fn key(&self, address: &TileAddress) -> TileKey {
        TileKey::new(self.parent.as_str(), &self.grid, address)
    }

    /// Resolve the tile at `address`. Missing and unreadable tiles resolve to
    /// an all-zero tile.
    pub async fn tile(&self, address: &TileAddress) -> Arc<dyn Raster> {
        let key = self.key(address).to_string();

        loop {
            if let Some(tile) = self.fast_lookup(&key, address).await {
                return tile;
            }

            let waiter = match self.in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => Some(entry.get().subscribe()),
                Entry::Vacant(entry) => {
                    let (tx, _) = broadcast::channel(1);
                    entry.insert(tx);
                    None
                }
            };

            match waiter {
                Some(mut rx) => {
                    self.record(Metrics::add_coalesced);
                    match rx.recv().await {
                        Ok(tile) => return tile,
                        Err(_) => {
                            tracing::debug!("Fetch of {} was abandoned, retrying", key);
                            continue;
                        }
                    }
                }
                None => {
                    let guard = InflightGuard {
                        map: &self.in_flight,
                        key: &key,
                        done: false,
                    };
                    let tile = self.durable_lookup(&key, address).await;
                    guard.complete(&tile);
                    return tile;
                }
            }
        }
    }

    fn record(&self, f: impl FnOnce(&Metrics)) {
        if let Some(m) = &self.metrics {
            f(m);
        }
    }

    async fn fast_lookup(&self, key: &str, address: &TileAddress) -> Option<Arc<dyn Raster>> {
        match self.fast.get(key).await {
            Ok(Some(bytes)) => match decode(key, address, &bytes) {
                Ok(tile) => {
                    tracing::debug!("Fast tier hit for {}", key);
                    self.record(Metrics::add_fast_hit);
                    Some(tile)
                }
                Err(e) => {
                    tracing::warn!("Ignoring fast tier entry {}: {}", key, e);
                    self.record(Metrics::add_tier_error);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Fast tier read of {} failed: {}", key, e);
                self.record(Metrics::add_tier_error);
                None
            }
        }
    }

    async fn durable_lookup(&self, key: &str, address: &TileAddress) -> Arc<dyn Raster> {
        let Some(bytes) = self.durable_get(key).await else {
            tracing::debug!("No stored tile {}, serving empty tile", key);
            self.record(Metrics::add_tile_miss);
            return empty(address);
        };

        let tile = match decode(key, address, &bytes) {
            Ok(tile) => tile,
            Err(e) => {
                tracing::warn!("Stored tile {} is unreadable, serving empty tile: {}", key, e);
                self.record(Metrics::add_tier_error);
                return empty(address);
            }
        };

        tracing::debug!("Durable hit for {} ({} bytes)", key, bytes.len());
        self.record(|m| {
            m.add_durable_hit();
            m.add_bytes_read(bytes.len() as u64);
        });

        if let Err(e) = self.fast.put(key, bytes).await {
            tracing::warn!("Failed to write {} back to fast tier: {}", key, e);
            self.record(Metrics::add_write_back_failure);
        }
        tile
    }

    /// Durable read retried up to `max_retries` times after the first
    /// failure; persistent failures count as a miss.
    async fn durable_get(&self, key: &str) -> Option<Bytes> {
        let max_attempts = self.retry.max_retries + 1;
        let mut attempt = 0;
        let mut backoff_ms = self.retry.initial_backoff_ms;

        loop {
            match self.durable.get(key).await {
                Ok(bytes) => return bytes,
                Err(e) => {
                    attempt += 1;
                    self.record(Metrics::add_tier_error);
                    if attempt >= max_attempts {
                        tracing::error!(
                            "Durable read of {} failed after {} attempts: {}",
                            key,
                            attempt,
                            e
                        );
                        return None;
                    }

                    tracing::warn!(
                        "Durable read of {} attempt {} failed: {}, retrying in {}ms",
                        key,
                        attempt,
                        e,
                        backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(self.retry.max_backoff_ms);
                }
            }
        }
    }
}

impl<F: FastTier, D: DurableStore> TileSource for TieredCache<F, D> {
    async fn fetch_tile(&self, address: &TileAddress) -> Result<Arc<dyn Raster>> {
        Ok(self.tile(address).await)
    }
}

fn decode(key: &str, address: &TileAddress, bytes: &[u8]) -> Result<Arc<dyn Raster>> {
    let raster = ArrayRaster::from_be_bytes(key, address.width, address.height, bytes)?;
    Ok(Arc::new(raster))
}

fn empty(address: &TileAddress) -> Arc<dyn Raster> {
    Arc::new(EmptyRaster::new(address.width, address.height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::io::store::ObjectTileStore;
    use crate::io::tile_cache::MemoryTier;
    use crate::raster::{encode_be, Argb, PixelIndex};
    use crate::transform::Mosaic;
    use object_store::memory::InMemory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Durable store wrapper counting reads, optionally slow or failing.
    struct CountingStore {
        inner: ObjectTileStore,
        gets: AtomicUsize,
        failures_left: AtomicUsize,
        delay: Duration,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: ObjectTileStore::new(Arc::new(InMemory::new()), "tiles", "tile"),
                gets: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    impl DurableStore for CountingStore {
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(Error::Io(std::io::Error::other("store unavailable")));
            }
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: Bytes) -> Result<()> {
            self.inner.put(key, value).await
        }
    }

    /// Fast tier whose writes always fail.
    struct ReadOnlyTier;

    impl FastTier for ReadOnlyTier {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            Ok(None)
        }

        async fn put(&self, _key: &str, _value: Bytes) -> Result<()> {
            Err(Error::Io(std::io::Error::other("fast tier is read-only")))
        }
    }

    fn grid() -> TileGrid {
        TileGrid::new(4, 4, 2, 2).unwrap()
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    async fn store_tile<D: DurableStore>(store: &D, address: &TileAddress, value: Argb) {
        let key = TileKey::new("world", &grid(), address);
        let pixels = vec![value; address.num_pixels()];
        store
            .put(&key.to_string(), Bytes::from(encode_be(&pixels)))
            .await
            .unwrap();
    }

    fn cache<F: FastTier>(fast: F, store: CountingStore) -> TieredCache<F, CountingStore> {
        TieredCache::new("world", grid(), fast, store)
            .with_retry(fast_retry())
            .with_metrics(Metrics::new())
    }

    fn metrics<F, D>(cache: &TieredCache<F, D>) -> crate::pipeline::MetricsSnapshot {
        cache.metrics.as_ref().unwrap().snapshot()
    }

    #[tokio::test]
    async fn test_cache_layering() {
        let store = CountingStore::new();
        let address = grid().tile(1, 0).unwrap();
        store_tile(&store, &address, 0xFF00_00FF).await;
        let cache = cache(MemoryTier::new(1024 * 1024), store);

        let first = cache.tile(&address).await;
        let second = cache.tile(&address).await;

        assert_eq!(first.pixel(1, 1).unwrap(), 0xFF00_00FF);
        assert_eq!(second.all_pixels().unwrap(), first.all_pixels().unwrap());
        assert_eq!(cache.durable_store().gets(), 1);

        let snapshot = metrics(&cache);
        assert_eq!(snapshot.durable_hits, 1);
        assert_eq!(snapshot.fast_hits, 1);
        assert_eq!(snapshot.bytes_read, 16);
    }

    #[tokio::test]
    async fn test_miss_fallback() {
        let cache = cache(MemoryTier::new(1024 * 1024), CountingStore::new());
        let address = grid().tile(1, 1).unwrap();

        let tile = cache.tile(&address).await;
        assert_eq!((tile.width(), tile.height()), (2, 2));
        assert!(tile.all_pixels().unwrap().iter().all(|&p| p == 0));
        assert_eq!(metrics(&cache).tile_misses, 1);
        // Misses are not cached
        assert!(cache.fast_tier().is_empty().await);
    }

    #[tokio::test]
    async fn test_disabled_fast_tier_reads_through() {
        let store = CountingStore::new();
        let address = grid().tile(0, 0).unwrap();
        store_tile(&store, &address, 7).await;
        let cache = cache(MemoryTier::disabled(), store);

        cache.tile(&address).await;
        cache.tile(&address).await;
        assert_eq!(cache.durable_store().gets(), 2);
    }

    #[tokio::test]
    async fn test_write_back_failure_is_not_fatal() {
        let store = CountingStore::new();
        let address = grid().tile(0, 1).unwrap();
        store_tile(&store, &address, 9).await;
        let cache = cache(ReadOnlyTier, store);

        let tile = cache.tile(&address).await;
        assert_eq!(tile.pixel(0, 0).unwrap(), 9);
        assert_eq!(metrics(&cache).write_back_failures, 1);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let store = CountingStore::new();
        let address = grid().tile(0, 0).unwrap();
        store_tile(&store, &address, 5).await;
        store.failures_left.store(2, Ordering::SeqCst);
        let cache = cache(MemoryTier::new(1024), store);

        let tile = cache.tile(&address).await;
        assert_eq!(tile.pixel(1, 0).unwrap(), 5);
        assert_eq!(cache.durable_store().gets(), 3);
        assert_eq!(metrics(&cache).tier_errors, 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_a_miss() {
        let store = CountingStore::new();
        store.failures_left.store(100, Ordering::SeqCst);
        let cache = cache(MemoryTier::new(1024), store);
        let address = grid().tile(0, 0).unwrap();

        let tile = cache.tile(&address).await;
        assert_eq!(tile.pixel(0, 0).unwrap(), 0);
        // First read plus three retries
        assert_eq!(cache.durable_store().gets(), 4);
        assert_eq!(metrics(&cache).tier_errors, 4);
    }

    #[tokio::test]
    async fn test_zero_retries_reads_once() {
        let store = CountingStore::new();
        store.failures_left.store(100, Ordering::SeqCst);
        let retry = RetryConfig {
            max_retries: 0,
            ..fast_retry()
        };
        let cache = TieredCache::new("world", grid(), MemoryTier::new(1024), store).with_retry(retry);
        let address = grid().tile(0, 0).unwrap();

        assert_eq!(cache.tile(&address).await.pixel(0, 0).unwrap(), 0);
        assert_eq!(cache.durable_store().gets(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_stored_tile_is_empty() {
        let store = CountingStore::new();
        let address = grid().tile(1, 1).unwrap();
        let key = TileKey::new("world", &grid(), &address);
        store
            .put(&key.to_string(), Bytes::from_static(&[1, 2, 3]))
            .await
            .unwrap();
        let cache = cache(MemoryTier::new(1024), store);

        let tile = cache.tile(&address).await;
        assert!(tile.all_pixels().unwrap().iter().all(|&p| p == 0));
        assert_eq!(metrics(&cache).tier_errors, 1);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let mut store = CountingStore::new();
        store.delay = Duration::from_millis(20);
        let address = grid().tile(1, 0).unwrap();
        store_tile(&store, &address, 3).await;
        let cache = Arc::new(cache(MemoryTier::new(1024 * 1024), store));

        let mut handles = vec![];
        for _ in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.tile(&address).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().pixel(0, 0).unwrap(), 3);
        }

        let gets = cache.durable_store().gets();
        assert!(gets <= 2, "Expected at most 2 durable reads, got {}", gets);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_releases_slot() {
        let mut store = CountingStore::new();
        store.delay = Duration::from_millis(50);
        let address = grid().tile(0, 0).unwrap();
        store_tile(&store, &address, 4).await;
        let cache = cache(MemoryTier::new(1024), store);

        let abandoned = tokio::time::timeout(Duration::from_millis(5), cache.tile(&address)).await;
        assert!(abandoned.is_err());
        assert_eq!(cache.in_flight(), 0);

        assert_eq!(cache.tile(&address).await.pixel(0, 0).unwrap(), 4);
    }

    #[tokio::test]
    async fn test_mosaic_over_tiered_cache() {
        let store = CountingStore::new();
        for address in grid().tiles() {
            store_tile(&store, &address, (address.tile_j * 2 + address.tile_i + 1) as Argb).await;
        }
        let mosaic = Mosaic::new(grid(), cache(MemoryTier::new(1024 * 1024), store));

        let coords: Vec<Option<PixelIndex>> = (0..4)
            .flat_map(|j| (0..4).map(move |i| Some(PixelIndex::new(i, j))))
            .collect();
        let values = mosaic.pixels(&coords).await.unwrap();
        assert_eq!(values, vec![1, 1, 2, 2, 1, 1, 2, 2, 3, 3, 4, 4, 3, 3, 4, 4]);
        assert_eq!(mosaic.source().durable_store().gets(), 4);

        // Second pass is served entirely from the fast tier
        mosaic.pixels(&coords).await.unwrap();
        assert_eq!(mosaic.source().durable_store().gets(), 4);
    }
}

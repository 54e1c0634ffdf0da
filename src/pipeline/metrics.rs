//! Render and cache metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters shared by the map service and the tiered cache.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Number of map images rendered
    pub maps_rendered: AtomicU64,

    /// Number of map requests rejected before rendering
    pub maps_rejected: AtomicU64,

    /// Number of target pixels rendered
    pub pixels_rendered: AtomicU64,

    /// Tile bytes read from the durable store
    pub bytes_read: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    /// Time spent rendering (microseconds)
    pub render_us: AtomicU64,

    // Cache metrics
    /// Tiles served by the fast tier
    pub fast_hits: AtomicU64,

    /// Tiles served by the durable store
    pub durable_hits: AtomicU64,

    /// Tiles found in neither tier (served empty)
    pub tile_misses: AtomicU64,

    /// Requests that waited on another request's fetch (single-flight)
    pub coalesced: AtomicU64,

    /// Tier reads that failed or returned undecodable data
    pub tier_errors: AtomicU64,

    /// Failed fast-tier write-backs
    pub write_back_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_map_rendered(&self, pixels: u64, duration: Duration) {
        self.maps_rendered.fetch_add(1, Ordering::Relaxed);
        self.pixels_rendered.fetch_add(pixels, Ordering::Relaxed);
        self.render_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_map_rejected(&self) {
        self.maps_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_fast_hit(&self) {
        self.fast_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_durable_hit(&self) {
        self.durable_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tile_miss(&self) {
        self.tile_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tier_error(&self) {
        self.tier_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_write_back_failure(&self) {
        self.write_back_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    pub fn maps_per_second(&self) -> f64 {
        let maps = self.maps_rendered.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            maps as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            maps_rendered: self.maps_rendered.load(Ordering::Relaxed),
            maps_rejected: self.maps_rejected.load(Ordering::Relaxed),
            pixels_rendered: self.pixels_rendered.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            maps_per_second: self.maps_per_second(),
            render_secs: self.render_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            fast_hits: self.fast_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            tile_misses: self.tile_misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            tier_errors: self.tier_errors.load(Ordering::Relaxed),
            write_back_failures: self.write_back_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub maps_rendered: u64,
    pub maps_rejected: u64,
    pub pixels_rendered: u64,
    pub bytes_read: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub maps_per_second: f64,
    /// Total time spent rendering (seconds, summed across tasks)
    pub render_secs: f64,
    pub fast_hits: u64,
    pub durable_hits: u64,
    pub tile_misses: u64,
    pub coalesced: u64,
    pub tier_errors: u64,
    pub write_back_failures: u64,
}

impl MetricsSnapshot {
    /// Share of tile lookups answered without a durable read, in percent.
    pub fn fast_hit_rate(&self) -> f64 {
        let total = self.fast_hits + self.durable_hits + self.tile_misses + self.coalesced;
        if total > 0 {
            (self.fast_hits + self.coalesced) as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Maps: {} rendered, {} rejected | Pixels: {} | \
             Tiles: {} fast, {} durable, {} empty, {} coalesced | \
             Read: {:.2} MB | Errors: {} tier, {} write-back | \
             Rate: {:.1} maps/s | Elapsed: {:.1}s | Cache: fast {:.0}%",
            self.maps_rendered,
            self.maps_rejected,
            self.pixels_rendered,
            self.fast_hits,
            self.durable_hits,
            self.tile_misses,
            self.coalesced,
            self.bytes_read as f64 / (1024.0 * 1024.0),
            self.tier_errors,
            self.write_back_failures,
            self.maps_per_second,
            self.elapsed.as_secs_f64(),
            self.fast_hit_rate(),
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_maps: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_maps: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
            total_maps,
        }
    }

    /// Report until `shutdown` fires or its sender is dropped.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_maps > 0 {
                        (snapshot.maps_rendered + snapshot.maps_rejected) as f64
                            / self.total_maps as f64
                            * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(fast: u64, durable: u64, misses: u64, coalesced: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            maps_rendered: 100,
            maps_rejected: 3,
            pixels_rendered: 100 * 256 * 256,
            bytes_read: 5 * 1024 * 1024,
            elapsed: Duration::from_secs(10),
            maps_per_second: 10.0,
            render_secs: 4.0,
            fast_hits: fast,
            durable_hits: durable,
            tile_misses: misses,
            coalesced,
            tier_errors: 1,
            write_back_failures: 0,
        }
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = Metrics::new();
        metrics.add_map_rendered(64, Duration::from_millis(250));
        metrics.add_map_rendered(16, Duration::from_millis(250));
        metrics.add_map_rejected();
        metrics.add_bytes_read(1000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.maps_rendered, 2);
        assert_eq!(snapshot.maps_rejected, 1);
        assert_eq!(snapshot.pixels_rendered, 80);
        assert_eq!(snapshot.bytes_read, 1000);
        assert!((snapshot.render_secs - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_cache_counters() {
        let metrics = Metrics::new();
        metrics.add_fast_hit();
        metrics.add_durable_hit();
        metrics.add_tile_miss();
        metrics.add_coalesced();
        metrics.add_tier_error();
        metrics.add_write_back_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fast_hits, 1);
        assert_eq!(snapshot.durable_hits, 1);
        assert_eq!(snapshot.tile_misses, 1);
        assert_eq!(snapshot.coalesced, 1);
        assert_eq!(snapshot.tier_errors, 1);
        assert_eq!(snapshot.write_back_failures, 1);
    }

    #[test]
    fn test_snapshot_display() {
        let display = format!("{}", snapshot(50, 20, 10, 20));
        assert!(display.contains("100 rendered"));
        assert!(display.contains("3 rejected"));
        assert!(display.contains("5.00 MB"));
        // (50 fast + 20 coalesced) of 100 lookups
        assert!(display.contains("fast 70%"));
    }

    #[test]
    fn test_zero_elapsed_no_panic() {
        let metrics = Metrics::default();
        metrics.add_map_rendered(1, Duration::ZERO);
        assert_eq!(metrics.maps_per_second(), 0.0);
        assert_eq!(snapshot(0, 0, 0, 0).fast_hit_rate(), 0.0);
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        snapshot(1, 2, 3, 4)
            .save_to_file(path.to_str().unwrap())
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["durable_hits"], 2);
        assert_eq!(json["elapsed"], 10.0);
    }

    #[test]
    fn test_metrics_reporter_new() {
        let reporter = MetricsReporter::new(Metrics::new(), 0, 1000);
        assert_eq!(reporter.interval_secs, 1);
        assert_eq!(reporter.total_maps, 1000);
    }
}

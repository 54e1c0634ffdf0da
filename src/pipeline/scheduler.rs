//! Cache warm-up over a lon/lat tile pyramid.
//!
//! The pyramid starts from the western and eastern hemispheres and quarters
//! every tile once per level. Each tile is rendered through the map service
//! with configurable concurrency, pulling the tiles it touches into the fast
//! tier.

use crate::config::Config;
use crate::crs::codes;
use crate::pipeline::{MapService, Metrics, MetricsReporter};
use crate::transform::{BoundingBox, MapRequest};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One tile of the warm-up pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidTile {
    /// Quadrant path from the top level, e.g. "W-NE-SW"
    pub label: String,

    /// Zero-based level
    pub level: usize,

    /// Extent in geographic lon/lat
    pub bbox: BoundingBox,
}

/// Tiles of the first `levels` pyramid levels, coarsest first.
pub fn pyramid(levels: usize) -> Vec<PyramidTile> {
    let [west, east] = BoundingBox::world().halves();
    let mut current = vec![
        PyramidTile {
            label: "W".to_string(),
            level: 0,
            bbox: west,
        },
        PyramidTile {
            label: "E".to_string(),
            level: 0,
            bbox: east,
        },
    ];

    let mut tiles = Vec::new();
    for _ in 0..levels {
        let next: Vec<PyramidTile> = current.iter().flat_map(quarter).collect();
        tiles.append(&mut current);
        current = next;
    }
    tiles
}

/// Split a tile into its SW, SE, NW and NE children.
fn quarter(parent: &PyramidTile) -> Vec<PyramidTile> {
    ["SW", "SE", "NW", "NE"]
        .into_iter()
        .zip(parent.bbox.quadrants())
        .map(|(suffix, bbox)| PyramidTile {
            label: format!("{}-{}", parent.label, suffix),
            level: parent.level + 1,
            bbox,
        })
        .collect()
}

/// Configuration for the warm-up scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of concurrent renders
    pub concurrency: usize,

    /// Pyramid levels to render
    pub levels: usize,

    /// Side length of each rendered tile in pixels
    pub tile_size: usize,

    /// Enable progress reporting
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    pub metrics_output_path: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            levels: 3,
            tile_size: 256,
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
        }
    }
}

impl SchedulerConfig {
    /// Scheduler settings from the render section of `config`.
    pub fn from_config(config: &Config, levels: usize, tile_size: usize) -> Self {
        Self {
            concurrency: config.render.concurrency,
            levels,
            tile_size: tile_size.min(config.render.max_image_size),
            enable_metrics: config.render.enable_metrics,
            metrics_interval_secs: config.render.metrics_interval_secs,
            metrics_output_path: config.render.metrics_output_path.clone(),
        }
    }
}

/// Renders the warm-up pyramid for one layer.
pub struct Scheduler {
    service: Arc<MapService>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(service: Arc<MapService>, config: SchedulerConfig) -> Self {
        let metrics = service.metrics().clone();
        Self {
            service,
            metrics,
            config,
        }
    }

    /// Render every pyramid tile of `layer`. Individual render failures are
    /// counted, not propagated.
    pub async fn run(&self, layer: &str) -> WarmStats {
        let tiles = pyramid(self.config.levels);
        let total_tiles = tiles.len();

        tracing::info!(
            "Warming '{}' with {} tiles over {} levels ({} concurrent)",
            layer,
            total_tiles,
            self.config.levels,
            self.config.concurrency
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_tiles as u64,
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        let size = self.config.tile_size;
        let results: Vec<bool> = stream::iter(tiles)
            .map(|tile| {
                let service = self.service.clone();
                async move {
                    let request = MapRequest::new(size, size, tile.bbox, codes::WGS84);
                    match service.render(&[layer], &request).await {
                        Ok(_) => true,
                        Err(e) => {
                            tracing::warn!("Failed to render {}: {}", tile.label, e);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        let rendered = results.iter().filter(|&&ok| ok).count();
        let stats = WarmStats {
            total_tiles,
            tiles_rendered: rendered,
            tiles_failed: total_tiles - rendered,
        };

        if let Some(ref path) = self.config.metrics_output_path {
            let snapshot = self.metrics.snapshot();
            if let Err(e) = snapshot.save_to_file(path) {
                tracing::warn!("Failed to save metrics to {}: {}", path, e);
            }
        }

        tracing::info!("Warm-up complete: {}", stats);
        stats
    }
}

/// Statistics from a warm-up run.
#[derive(Debug, Default, PartialEq)]
pub struct WarmStats {
    pub total_tiles: usize,
    pub tiles_rendered: usize,
    pub tiles_failed: usize,
}

impl std::fmt::Display for WarmStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rendered: {}, Failed: {}, Total: {}",
            self.tiles_rendered, self.tiles_failed, self.total_tiles
        )
    }
}

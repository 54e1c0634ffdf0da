//! Map rendering service.
//!
//! Holds the configured source layers and turns validated map requests into
//! rendered canvases. One layer is rendered per request.

use crate::config::{Config, LayerConfig, LayerSourceConfig};
use crate::crs::ProjectionRegistry;
use crate::error::{Error, Result};
use crate::index::TileGrid;
use crate::io::{MemoryTier, ObjectTileStore, StripFileSource, TieredCache};
use crate::pipeline::Metrics;
use crate::raster::{ArrayRaster, Argb, PixelIndex};
use crate::transform::{render_map, BoundingBox, GeoreferencedRaster, MapRequest, Mosaic, PixelSource};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Tiled layer resolved through the shared fast tier and the durable store.
pub type TileLayer = Mosaic<TieredCache<Arc<MemoryTier>, ObjectTileStore>>;

/// Layer backed by local strip files.
pub type StripLayer = Mosaic<StripFileSource>;

/// Pixel storage behind a layer.
pub enum LayerSource {
    Tiles(TileLayer),
    Strips(StripLayer),
}

impl LayerSource {
    pub fn dispose(&self) {
        match self {
            LayerSource::Tiles(mosaic) => mosaic.dispose(),
            LayerSource::Strips(mosaic) => mosaic.dispose(),
        }
    }
}

impl PixelSource for LayerSource {
    fn dimensions(&self) -> (usize, usize) {
        match self {
            LayerSource::Tiles(mosaic) => mosaic.dimensions(),
            LayerSource::Strips(mosaic) => mosaic.dimensions(),
        }
    }

    async fn read_pixel(&self, i: usize, j: usize) -> Result<Argb> {
        match self {
            LayerSource::Tiles(mosaic) => mosaic.pixel(i, j).await,
            LayerSource::Strips(mosaic) => mosaic.pixel(i, j).await,
        }
    }

    async fn read_pixels(&self, coords: &[Option<PixelIndex>]) -> Result<Vec<Argb>> {
        match self {
            LayerSource::Tiles(mosaic) => mosaic.pixels(coords).await,
            LayerSource::Strips(mosaic) => mosaic.pixels(coords).await,
        }
    }
}

pub type Layer = GeoreferencedRaster<LayerSource>;

/// Registry of named layers plus the request limits applied to them.
pub struct MapService {
    layers: HashMap<String, Layer>,
    registry: Arc<ProjectionRegistry>,
    max_image_size: usize,
    metrics: Arc<Metrics>,
}

impl MapService {
    pub fn new(registry: Arc<ProjectionRegistry>, max_image_size: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            layers: HashMap::new(),
            registry,
            max_image_size,
            metrics,
        }
    }

    /// Build every configured layer. Tiled layers share one durable store
    /// and one fast tier.
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let registry = Arc::new(ProjectionRegistry::default());
        let mut service = Self::new(registry.clone(), config.render.max_image_size, metrics.clone());

        let needs_store = config
            .layers
            .iter()
            .any(|l| l.source == LayerSourceConfig::Tiles);
        let store = if needs_store {
            tracing::info!("Tile store: {}", config.store.path_display());
            Some(ObjectTileStore::from_config(&config.store, &config.retry)?)
        } else {
            None
        };
        let fast = Arc::new(MemoryTier::new(config.cache.fast_tier_bytes()));
        if !fast.is_enabled() {
            tracing::info!("Fast tier disabled");
        }

        for layer in &config.layers {
            let source = match (&layer.source, &store) {
                (LayerSourceConfig::Tiles, Some(store)) => {
                    let grid = tile_grid(config, layer)?;
                    let cache = TieredCache::new(&layer.name, grid, fast.clone(), store.clone())
                        .with_retry(config.retry.clone())
                        .with_metrics(metrics.clone());
                    LayerSource::Tiles(
                        Mosaic::new(grid, cache).with_fetch_concurrency(config.cache.fetch_concurrency),
                    )
                }
                (LayerSourceConfig::Strips { directory }, _) => {
                    let strips = StripFileSource::open(directory, layer.width, layer.height)?;
                    LayerSource::Strips(
                        Mosaic::new(strips.grid(), strips)
                            .with_fetch_concurrency(config.cache.fetch_concurrency),
                    )
                }
                (LayerSourceConfig::Tiles, None) => anyhow::bail!("No tile store for '{}'", layer.name),
            };

            let bbox = BoundingBox::from_slice(&layer.bbox)?;
            let projection = registry.get(&layer.crs)?;
            service.add_layer(&layer.name, GeoreferencedRaster::new(source, bbox, projection));
            tracing::info!(
                "Layer '{}': {}x{} in {}",
                layer.name,
                layer.width,
                layer.height,
                layer.crs
            );
        }

        Ok(service)
    }

    /// Register `layer` under `name`, replacing any earlier layer of that name.
    pub fn add_layer(&mut self, name: impl Into<String>, layer: Layer) {
        if let Some(previous) = self.layers.insert(name.into(), layer) {
            previous.source().dispose();
        }
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    /// Layer names, sorted.
    pub fn layer_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.layers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn registry(&self) -> &ProjectionRegistry {
        &self.registry
    }

    pub fn max_image_size(&self) -> usize {
        self.max_image_size
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Check a request against the service limits, returning the layer it
    /// addresses.
    pub fn validate(&self, layers: &[&str], request: &MapRequest) -> Result<&Layer> {
        let name = match layers {
            [name] => *name,
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "exactly one layer must be requested, got {}",
                    layers.len()
                )))
            }
        };
        if request.width == 0 || request.height == 0 {
            return Err(Error::InvalidRequest(format!(
                "image size {}x{} must be positive",
                request.width, request.height
            )));
        }
        if request.width > self.max_image_size || request.height > self.max_image_size {
            return Err(Error::InvalidRequest(format!(
                "image size {}x{} exceeds the {} pixel limit",
                request.width, request.height, self.max_image_size
            )));
        }
        if !self.registry.supports(&request.crs) {
            return Err(Error::UnsupportedCrs(request.crs.clone()));
        }
        self.layers
            .get(name)
            .ok_or_else(|| Error::UnknownLayer(name.to_string()))
    }

    /// Validate and render one map request.
    pub async fn render(&self, layers: &[&str], request: &MapRequest) -> Result<ArrayRaster> {
        let layer = match self.validate(layers, request) {
            Ok(layer) => layer,
            Err(e) => {
                self.metrics.add_map_rejected();
                tracing::warn!("Rejected map request: {}", e);
                return Err(e);
            }
        };

        let start = Instant::now();
        let image = render_map(request, layer, &self.registry).await?;
        let elapsed = start.elapsed();
        self.metrics
            .add_map_rendered(request.num_pixels() as u64, elapsed);

        tracing::debug!(
            "Rendered {} {}x{} {:?} in {:?}",
            layers[0],
            request.width,
            request.height,
            request.bbox.to_array(),
            elapsed
        );
        Ok(image)
    }

    /// Release every layer's file handles.
    pub fn dispose(&self) {
        for layer in self.layers.values() {
            layer.source().dispose();
        }
    }
}

fn tile_grid(config: &Config, layer: &LayerConfig) -> Result<TileGrid> {
    TileGrid::with_byte_budget(
        layer.width,
        layer.height,
        config.cache.max_tile_width,
        config.cache.max_tile_height,
        config.cache.max_tile_bytes,
    )
}

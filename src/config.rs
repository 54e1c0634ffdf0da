//! Configuration for the basemap tile service.

use crate::crs::ProjectionRegistry;
use crate::transform::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source layers that may be requested
    #[serde(default)]
    pub layers: Vec<LayerConfig>,

    /// Durable tile store
    pub store: StoreConfig,

    /// Tile layout and fast tier
    #[serde(default)]
    pub cache: CacheConfig,

    /// Request rendering and runtime
    #[serde(default)]
    pub render: RenderConfig,

    /// Retry configuration for durable store reads
    #[serde(default)]
    pub retry: RetryConfig,
}

/// One source raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Layer name; also the parent id of its tile keys
    pub name: String,

    /// Full raster width in pixels
    pub width: usize,

    /// Full raster height in pixels
    pub height: usize,

    /// Extent in the layer's CRS [min_x, min_y, max_x, max_y]
    #[serde(default = "default_layer_bbox")]
    pub bbox: [f64; 4],

    /// CRS code of the layer's native projection
    #[serde(default = "default_layer_crs")]
    pub crs: String,

    /// Where the layer's pixels live
    #[serde(default)]
    pub source: LayerSourceConfig,
}

/// Backing storage of a layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSourceConfig {
    /// Tiles in the durable store behind the fast tier
    #[default]
    Tiles,

    /// Directory of full-width `*.pixels` strip files
    Strips { directory: String },
}

/// Durable tile store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Local filesystem directory holding tile objects.
    /// Mutually exclusive with bucket.
    #[serde(default)]
    pub local_path: Option<String>,

    /// S3 bucket holding tile objects
    #[serde(default)]
    pub bucket: Option<String>,

    /// Key prefix inside the bucket
    #[serde(default)]
    pub prefix: Option<String>,

    /// AWS region (default: from environment)
    #[serde(default)]
    pub region: Option<String>,

    /// Custom S3-compatible endpoint
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Tile object extension
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl StoreConfig {
    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }

    /// The store location as a display string (local path or s3:// URI).
    pub fn path_display(&self) -> String {
        if let Some(path) = &self.local_path {
            path.clone()
        } else {
            format!(
                "s3://{}/{}",
                self.bucket.as_deref().unwrap_or(""),
                self.prefix.as_deref().unwrap_or("")
            )
        }
    }

    /// Key prefix applied inside the store. Empty for local stores, whose
    /// directory is baked into the store itself.
    pub fn key_prefix(&self) -> &str {
        if self.is_local() {
            ""
        } else {
            self.prefix.as_deref().unwrap_or("")
        }
    }
}

/// Tile layout and fast tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Fast tier budget in MB (0 disables the fast tier)
    #[serde(default = "default_fast_tier_mb")]
    pub fast_tier_mb: f64,

    /// Maximum tile width in pixels
    #[serde(default = "default_tile_size")]
    pub max_tile_width: usize,

    /// Maximum tile height in pixels
    #[serde(default = "default_tile_size")]
    pub max_tile_height: usize,

    /// Byte budget of one stored tile
    #[serde(default = "default_max_tile_bytes")]
    pub max_tile_bytes: usize,

    /// Tiles fetched concurrently within one batch read
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

impl CacheConfig {
    pub fn fast_tier_bytes(&self) -> u64 {
        (self.fast_tier_mb.max(0.0) * 1024.0 * 1024.0) as u64
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_tier_mb: default_fast_tier_mb(),
            max_tile_width: default_tile_size(),
            max_tile_height: default_tile_size(),
            max_tile_bytes: default_max_tile_bytes(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

/// Rendering and runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Largest accepted image side length
    #[serde(default = "default_max_image_size")]
    pub max_image_size: usize,

    /// Concurrent renders when warming the cache
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Rayon thread pool size for CPU-bound work
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Enable periodic metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after a run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_image_size: default_max_image_size(),
            concurrency: default_concurrency(),
            worker_threads: None,
            rayon_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

/// Retry configuration for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after a failed durable read; `0` reads once. The S3 client
    /// also retries transport errors with this count beneath these retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.store.local_path, &self.store.bucket) {
            (Some(_), Some(_)) => anyhow::bail!("Cannot specify both local_path and bucket"),
            (None, None) => anyhow::bail!("Must specify either store.local_path or store.bucket"),
            _ => {}
        }
        if self.store.extension.is_empty() || self.store.extension.contains('.') {
            anyhow::bail!("Store extension must be non-empty and contain no '.'");
        }

        let cache = &self.cache;
        if cache.max_tile_width == 0 || cache.max_tile_height == 0 {
            anyhow::bail!("Tile sizes must be > 0");
        }
        let tile_bytes = cache.max_tile_width * cache.max_tile_height * crate::raster::BYTES_PER_PIXEL;
        if tile_bytes > cache.max_tile_bytes {
            anyhow::bail!(
                "Tiles of {}x{} need {} bytes, over the {} byte budget",
                cache.max_tile_width,
                cache.max_tile_height,
                tile_bytes,
                cache.max_tile_bytes
            );
        }
        if cache.fetch_concurrency == 0 {
            anyhow::bail!("Fetch concurrency must be > 0");
        }
        if self.render.max_image_size == 0 {
            anyhow::bail!("Max image size must be > 0");
        }
        if self.render.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }

        let registry = ProjectionRegistry::default();
        let mut names = HashSet::new();
        for layer in &self.layers {
            if layer.name.is_empty() {
                anyhow::bail!("Layer names must be non-empty");
            }
            if !names.insert(layer.name.as_str()) {
                anyhow::bail!("Duplicate layer '{}'", layer.name);
            }
            if layer.width == 0 || layer.height == 0 {
                anyhow::bail!("Layer '{}' must have a non-zero size", layer.name);
            }
            BoundingBox::from_slice(&layer.bbox)
                .map_err(|e| anyhow::anyhow!("Layer '{}': {}", layer.name, e))?;
            if !registry.supports(&layer.crs) {
                anyhow::bail!("Layer '{}' uses unsupported CRS '{}'", layer.name, layer.crs);
            }
            if let LayerSourceConfig::Strips { directory } = &layer.source {
                if directory.is_empty() {
                    anyhow::bail!("Layer '{}' needs a strip directory", layer.name);
                }
            }
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_layer_bbox() -> [f64; 4] { [-180.0, -90.0, 180.0, 90.0] }
fn default_layer_crs() -> String { crate::crs::codes::WGS84.to_string() }
fn default_extension() -> String { crate::index::TILE_EXTENSION.to_string() }
fn default_fast_tier_mb() -> f64 { 256.0 }
fn default_tile_size() -> usize { crate::index::DEFAULT_TILE_SIZE }
fn default_max_tile_bytes() -> usize { crate::index::DEFAULT_TILE_BYTE_BUDGET }
fn default_fetch_concurrency() -> usize { 8 }
fn default_max_image_size() -> usize { 512 }
fn default_concurrency() -> usize { 16 }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
fn default_max_retries() -> usize { 3 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 10000 }

//! Basemap Tiles
//!
//! Renders rectangular map images cropped and reprojected from very large
//! rasters stored as bounded-size tiles.
//!
//! # Architecture
//!
//! - **CRS**: Geographic, polar stereographic and transverse Mercator projections
//! - **Raster**: In-memory, empty and file-backed pixel grids
//! - **Index**: Tile layout of a large raster and canonical tile keys
//! - **I/O**: Durable object store, in-memory fast tier and the tiered cache
//! - **Transform**: Georeferencing, tile mosaics and nearest-neighbour rendering
//! - **Pipeline**: Layer registry, request validation, cache warm-up and metrics
//!
//! # Usage
//!
//! ```no_run
//! use basemap_tiles::{build_service, Config};
//! use basemap_tiles::transform::{BoundingBox, MapRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     config.validate()?;
//!     let service = build_service(&config)?;
//!     let request = MapRequest::new(256, 256, BoundingBox::world(), "EPSG:4326");
//!     let image = service.render(&["bluemarble"], &request).await?;
//!     std::fs::write("world.argb", image.to_be_bytes())?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crs;
pub mod error;
pub mod index;
pub mod io;
pub mod pipeline;
pub mod raster;
pub mod transform;

pub use config::Config;
pub use crs::{Projection, ProjectionRegistry};
pub use error::{Error, ProjectionError};
pub use index::{TileGrid, TileKey};
pub use io::{MemoryTier, ObjectTileStore, TieredCache};
pub use pipeline::{MapService, Metrics, Scheduler, SchedulerConfig, WarmStats};
pub use transform::{render_map, GeoreferencedRaster, MapRequest, Mosaic};

use anyhow::Result;
use std::sync::Arc;

/// Build the map service for a validated configuration.
pub fn build_service(config: &Config) -> Result<Arc<MapService>> {
    tracing::info!("Building map service with {} layers", config.layers.len());
    let service = MapService::from_config(config, Metrics::new())?;
    Ok(Arc::new(service))
}

/// Render the warm-up pyramid of `layer` through a caller-owned service,
/// leaving every tile it touches in that service's fast tier.
pub async fn warm_cache(service: Arc<MapService>, layer: &str, config: SchedulerConfig) -> Result<WarmStats> {
    if service.layer(layer).is_none() {
        anyhow::bail!("Unknown layer '{}'", layer);
    }
    let scheduler = Scheduler::new(service, config);
    Ok(scheduler.run(layer).await)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}

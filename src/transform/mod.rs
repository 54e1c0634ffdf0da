//! Data transformation: georeferencing, tile mosaics and map rendering.

mod georeferenced;
mod mosaic;
mod reproject;

pub use georeferenced::{BoundingBox, Georeference, GeoreferencedRaster, LonLat, LonLatSequence};
pub use mosaic::{Mosaic, PixelSource, TileSource, DEFAULT_FETCH_CONCURRENCY};
pub use reproject::{render_map, MapRequest};

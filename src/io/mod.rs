//! Tile storage: durable object store, fast in-memory tier, the tiered
//! cache combining them, and file-backed strip mosaics.

mod store;
mod strip_reader;
pub mod tile_cache;
mod tiered;

pub use store::{
    create_tile_store, load_tile_directory, parse_s3_uri, store_config_from_uri, DurableStore,
    ObjectTileStore,
};
pub use strip_reader::{StripFileSource, STRIP_EXTENSION};
pub use tile_cache::{FastTier, MemoryTier};
pub use tiered::TieredCache;

//! Tile layout and tile identity for mosaicked rasters.

mod tile_grid;
mod tile_key;

pub use tile_grid::{
    TileAddress, TileGrid, TileRequest, DEFAULT_TILE_BYTE_BUDGET, DEFAULT_TILE_SIZE,
};
pub use tile_key::{TileKey, KEY_DELIMITER, TILE_EXTENSION};

//! Partition of a large logical raster into bounded-size tiles.
//!
//! Tiles start at `(0, 0)` and run left-to-right, then top-to-bottom. Every
//! tile is `max_tile_width x max_tile_height` except the last one in each row
//! or column, which is truncated to the remainder.

use crate::error::{Error, Result};
use crate::raster::{PixelIndex, BYTES_PER_PIXEL};
use std::collections::HashMap;

/// Default storage budget for one tile, in bytes.
pub const DEFAULT_TILE_BYTE_BUDGET: usize = 1_000_000;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: usize = 500;

/// Position and extent of one tile in its parent raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileAddress {
    /// Tile column index
    pub tile_i: usize,

    /// Tile row index
    pub tile_j: usize,

    /// Parent pixel column of the tile's top-left corner
    pub x: usize,

    /// Parent pixel row of the tile's top-left corner
    pub y: usize,

    pub width: usize,
    pub height: usize,
}

impl TileAddress {
    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    pub fn byte_len(&self) -> usize {
        self.num_pixels() * BYTES_PER_PIXEL
    }
}

/// Pixels of one batch request that fall in the same tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub address: TileAddress,

    /// Offsets within the tile
    pub offsets: Vec<PixelIndex>,

    /// Position of each offset in the original request
    pub positions: Vec<usize>,
}

/// Tile layout of a `width x height` raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub width: usize,
    pub height: usize,
    pub max_tile_width: usize,
    pub max_tile_height: usize,
}

impl TileGrid {
    pub fn new(
        width: usize,
        height: usize,
        max_tile_width: usize,
        max_tile_height: usize,
    ) -> Result<Self> {
        if max_tile_width == 0 || max_tile_height == 0 {
            return Err(Error::MalformedCoordinates(format!(
                "tile size {}x{} must be positive",
                max_tile_width, max_tile_height
            )));
        }
        Ok(Self {
            width,
            height,
            max_tile_width,
            max_tile_height,
        })
    }

    /// Like [`TileGrid::new`], additionally rejecting tile sizes whose
    /// encoding would exceed `byte_budget`.
    pub fn with_byte_budget(
        width: usize,
        height: usize,
        max_tile_width: usize,
        max_tile_height: usize,
        byte_budget: usize,
    ) -> Result<Self> {
        let bytes = max_tile_width * max_tile_height * BYTES_PER_PIXEL;
        if bytes > byte_budget {
            return Err(Error::TileTooLarge {
                width: max_tile_width,
                height: max_tile_height,
                bytes,
                budget: byte_budget,
            });
        }
        Self::new(width, height, max_tile_width, max_tile_height)
    }

    /// Number of tile columns.
    pub fn tiles_across(&self) -> usize {
        self.width.div_ceil(self.max_tile_width)
    }

    /// Number of tile rows.
    pub fn tiles_down(&self) -> usize {
        self.height.div_ceil(self.max_tile_height)
    }

    pub fn num_tiles(&self) -> usize {
        self.tiles_across() * self.tiles_down()
    }

    /// Width of tiles in column `tile_i`.
    pub fn tile_width(&self, tile_i: usize) -> Result<usize> {
        let count = self.tiles_across();
        if tile_i >= count {
            return Err(Error::TileOutOfRange {
                axis: "x",
                index: tile_i,
                count,
            });
        }
        Ok(self
            .max_tile_width
            .min(self.width - tile_i * self.max_tile_width))
    }

    /// Height of tiles in row `tile_j`.
    pub fn tile_height(&self, tile_j: usize) -> Result<usize> {
        let count = self.tiles_down();
        if tile_j >= count {
            return Err(Error::TileOutOfRange {
                axis: "y",
                index: tile_j,
                count,
            });
        }
        Ok(self
            .max_tile_height
            .min(self.height - tile_j * self.max_tile_height))
    }

    pub fn tile(&self, tile_i: usize, tile_j: usize) -> Result<TileAddress> {
        Ok(TileAddress {
            tile_i,
            tile_j,
            x: tile_i * self.max_tile_width,
            y: tile_j * self.max_tile_height,
            width: self.tile_width(tile_i)?,
            height: self.tile_height(tile_j)?,
        })
    }

    /// Owning tile of pixel `(i, j)` and the pixel's offset inside it.
    pub fn locate(&self, i: usize, j: usize) -> Result<(TileAddress, PixelIndex)> {
        if i >= self.width || j >= self.height {
            return Err(Error::out_of_bounds(
                i as i64,
                j as i64,
                self.width,
                self.height,
            ));
        }
        let tile = self.tile(i / self.max_tile_width, j / self.max_tile_height)?;
        Ok((
            tile,
            PixelIndex::new(i % self.max_tile_width, j % self.max_tile_height),
        ))
    }

    /// All tiles, row-major.
    pub fn tiles(&self) -> impl Iterator<Item = TileAddress> + '_ {
        (0..self.tiles_down()).flat_map(move |tile_j| {
            (0..self.tiles_across()).filter_map(move |tile_i| self.tile(tile_i, tile_j).ok())
        })
    }

    /// Group pixel coordinates by owning tile, in order of first appearance.
    ///
    /// `None` entries are skipped. Any coordinate outside the raster fails the
    /// whole batch.
    pub fn group(&self, coords: &[Option<PixelIndex>]) -> Result<Vec<TileRequest>> {
        let mut slots: HashMap<(usize, usize), usize> = HashMap::new();
        let mut requests: Vec<TileRequest> = Vec::new();

        for (position, coord) in coords.iter().enumerate() {
            let Some(p) = coord else { continue };
            let (address, offset) = self.locate(p.i, p.j)?;
            let slot = *slots
                .entry((address.tile_i, address.tile_j))
                .or_insert_with(|| {
                    requests.push(TileRequest {
                        address,
                        offsets: Vec::new(),
                        positions: Vec::new(),
                    });
                    requests.len() - 1
                });
            requests[slot].offsets.push(offset);
            requests[slot].positions.push(position);
        }

        Ok(requests)
    }
}

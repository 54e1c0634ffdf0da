//! Canonical tile keys.
//!
//! A key renders as `<parent>_<parentWidth>_<parentHeight>_<x>_<y>_<width>_<height>`.
//! The same string names tile objects in the durable store and tile files on
//! disk (`<key>.<ext>`). Parsing takes the six numeric fields from the right,
//! so parent names may themselves contain `_`.

use super::tile_grid::{TileAddress, TileGrid};
use crate::error::{Error, Result};
use crate::raster::BYTES_PER_PIXEL;
use std::fmt;
use std::str::FromStr;

/// Field delimiter of the string encoding.
pub const KEY_DELIMITER: char = '_';

/// Default tile file extension.
pub const TILE_EXTENSION: &str = "tile";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub parent: String,
    pub parent_width: usize,
    pub parent_height: usize,
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl TileKey {
    /// Key of `address` within the parent raster `parent` laid out by `grid`.
    pub fn new(parent: impl Into<String>, grid: &TileGrid, address: &TileAddress) -> Self {
        Self {
            parent: parent.into(),
            parent_width: grid.width,
            parent_height: grid.height,
            x: address.x,
            y: address.y,
            width: address.width,
            height: address.height,
        }
    }

    /// Encoded size of the tile's pixels.
    pub fn byte_len(&self) -> usize {
        self.width
            .saturating_mul(self.height)
            .saturating_mul(BYTES_PER_PIXEL)
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self, extension)
    }

    /// Parse a tile file name, ignoring its extension.
    pub fn from_file_name(name: &str) -> Result<Self> {
        let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
        stem.parse()
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = KEY_DELIMITER;
        write!(
            f,
            "{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}",
            self.parent,
            self.parent_width,
            self.parent_height,
            self.x,
            self.y,
            self.width,
            self.height,
        )
    }
}

impl FromStr for TileKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.rsplitn(7, KEY_DELIMITER).collect();
        if fields.len() != 7 {
            return Err(Error::malformed_key(
                s,
                format!("expected 7 '{}'-separated fields, found {}", KEY_DELIMITER, fields.len()),
            ));
        }
        let parent = fields[6];
        if parent.is_empty() {
            return Err(Error::malformed_key(s, "empty parent name"));
        }

        let number = |idx: usize, what: &str| -> Result<usize> {
            fields[idx]
                .parse()
                .map_err(|_| Error::malformed_key(s, format!("{} '{}' is not a number", what, fields[idx])))
        };

        let key = TileKey {
            parent: parent.to_string(),
            parent_width: number(5, "parent width")?,
            parent_height: number(4, "parent height")?,
            x: number(3, "x")?,
            y: number(2, "y")?,
            width: number(1, "width")?,
            height: number(0, "height")?,
        };

        let past = |start: usize, len: usize, limit: usize| start.checked_add(len).map_or(true, |end| end > limit);
        if past(key.x, key.width, key.parent_width) || past(key.y, key.height, key.parent_height) {
            return Err(Error::malformed_key(s, "tile extends past its parent raster"));
        }
        let fits = key
            .width
            .checked_mul(key.height)
            .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
            .is_some();
        if !fits {
            return Err(Error::malformed_key(s, "tile byte size overflows"));
        }
        Ok(key)
    }
}

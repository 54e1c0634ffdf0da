//! Mosaic of full-width horizontal strips stored as local pixel files.
//!
//! A layer directory holds headerless `*.pixels` files of big-endian ARGB
//! pixels. Sorted by name, they stack top to bottom. Every strip except the
//! last has the same height; the last may be shorter.

use super::store::find_files;
use crate::error::{Error, Result};
use crate::index::{TileAddress, TileGrid};
use crate::raster::{FileRaster, Raster, BYTES_PER_PIXEL};
use crate::transform::TileSource;
use std::path::Path;
use std::sync::Arc;

/// Extension of strip files.
pub const STRIP_EXTENSION: &str = "pixels";

/// Tile source serving one file-backed strip per tile row.
pub struct StripFileSource {
    strips: Vec<Arc<FileRaster>>,
    grid: TileGrid,
}

impl StripFileSource {
    /// Open every strip in `dir` for a `width x height` raster.
    pub fn open(dir: impl AsRef<Path>, width: usize, height: usize) -> Result<Self> {
        let dir = dir.as_ref();
        if width == 0 {
            return Err(Error::InvalidMosaic("strip width must be > 0".to_string()));
        }
        let files = find_files(dir, STRIP_EXTENSION)?;
        if files.is_empty() {
            return Err(Error::InvalidMosaic(format!(
                "{} contains no .{} files",
                dir.display(),
                STRIP_EXTENSION
            )));
        }

        let row_bytes = (width * BYTES_PER_PIXEL) as u64;
        let mut strip_height = 0;
        let mut total = 0;
        let mut strips = Vec::with_capacity(files.len());

        for (n, path) in files.iter().enumerate() {
            let len = std::fs::metadata(path)?.len();
            let name = path.display();
            if len == 0 || len % row_bytes != 0 {
                return Err(Error::InvalidMosaic(format!(
                    "{} is {} bytes, not a whole number of {}-pixel rows",
                    name, len, width
                )));
            }
            let rows = (len / row_bytes) as usize;

            if n == 0 {
                strip_height = rows;
            } else if n < files.len() - 1 && rows != strip_height {
                return Err(Error::InvalidMosaic(format!(
                    "{} has {} rows, expected {}",
                    name, rows, strip_height
                )));
            } else if rows > strip_height {
                return Err(Error::InvalidMosaic(format!(
                    "last strip {} has {} rows, more than {}",
                    name, rows, strip_height
                )));
            }

            total += rows;
            strips.push(Arc::new(FileRaster::open(path, width, rows)?));
        }

        if total != height {
            return Err(Error::InvalidMosaic(format!(
                "strip heights sum to {}, expected {}",
                total, height
            )));
        }

        tracing::info!(
            "Opened {} strips of {}x{} from {}",
            strips.len(),
            width,
            strip_height,
            dir.display()
        );
        Ok(Self {
            strips,
            grid: TileGrid::new(width, height, width, strip_height)?,
        })
    }

    /// Tile layout matching the strips.
    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    pub fn num_strips(&self) -> usize {
        self.strips.len()
    }
}

impl TileSource for StripFileSource {
    async fn fetch_tile(&self, address: &TileAddress) -> Result<Arc<dyn Raster>> {
        if address.tile_i != 0 {
            return Err(Error::TileOutOfRange {
                axis: "x",
                index: address.tile_i,
                count: 1,
            });
        }
        let strip = self
            .strips
            .get(address.tile_j)
            .ok_or(Error::TileOutOfRange {
                axis: "y",
                index: address.tile_j,
                count: self.strips.len(),
            })?;
        Ok(strip.clone() as Arc<dyn Raster>)
    }

    fn dispose(&self) {
        for strip in &self.strips {
            strip.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{encode_be, Argb, PixelIndex};
    use crate::transform::Mosaic;
    use tempfile::TempDir;

    /// Write strips of a 3-wide raster whose pixel values are their row-major index.
    fn write_strips(dir: &Path, heights: &[usize]) {
        let mut row = 0;
        for (n, &h) in heights.iter().enumerate() {
            let pixels: Vec<Argb> = (row * 3..(row + h) * 3).map(|p| p as Argb).collect();
            std::fs::write(dir.join(format!("strip_{:03}.pixels", n)), encode_be(&pixels)).unwrap();
            row += h;
        }
    }

    #[tokio::test]
    async fn test_strip_mosaic() {
        let dir = TempDir::new().unwrap();
        write_strips(dir.path(), &[4, 4, 2]);
        std::fs::write(dir.path().join("README"), b"not a strip").unwrap();

        let source = StripFileSource::open(dir.path(), 3, 10).unwrap();
        assert_eq!(source.num_strips(), 3);
        let grid = source.grid();
        assert_eq!((grid.tiles_across(), grid.tiles_down()), (1, 3));

        let mosaic = Mosaic::new(grid, source);
        assert_eq!(mosaic.pixel(0, 0).await.unwrap(), 0);
        assert_eq!(mosaic.pixel(2, 9).await.unwrap(), 29);

        let coords: Vec<Option<PixelIndex>> = (0..10).map(|j| Some(PixelIndex::new(1, j))).collect();
        let values = mosaic.pixels(&coords).await.unwrap();
        assert_eq!(values, (0..10).map(|j| j * 3 + 1).collect::<Vec<Argb>>());
    }

    #[tokio::test]
    async fn test_dispose_closes_every_strip() {
        let dir = TempDir::new().unwrap();
        write_strips(dir.path(), &[2, 2]);
        let source = StripFileSource::open(dir.path(), 3, 4).unwrap();
        let mosaic = Mosaic::new(source.grid(), source);

        mosaic.dispose();
        assert!(mosaic.source().strips.iter().all(|s| s.is_disposed()));
        assert!(matches!(mosaic.pixel(0, 3).await, Err(Error::Disposed)));
    }

    #[test]
    fn test_rejects_inconsistent_strips() {
        let dir = TempDir::new().unwrap();
        write_strips(dir.path(), &[4, 3, 2]);
        assert!(matches!(
            StripFileSource::open(dir.path(), 3, 9),
            Err(Error::InvalidMosaic(_))
        ));

        let dir = TempDir::new().unwrap();
        write_strips(dir.path(), &[2, 3]);
        assert!(StripFileSource::open(dir.path(), 3, 5).is_err());

        let dir = TempDir::new().unwrap();
        write_strips(dir.path(), &[2, 2]);
        assert!(StripFileSource::open(dir.path(), 3, 5).is_err());

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pixels"), vec![0u8; 10]).unwrap();
        assert!(StripFileSource::open(dir.path(), 3, 1).is_err());
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            StripFileSource::open(dir.path(), 3, 3),
            Err(Error::InvalidMosaic(_))
        ));
        assert!(matches!(
            StripFileSource::open(dir.path().join("missing"), 3, 3),
            Err(Error::Io(_))
        ));
    }
}

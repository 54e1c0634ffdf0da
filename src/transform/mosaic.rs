//! A tiled raster presented as one addressable pixel source.
//!
//! Batch reads are grouped by owning tile so each distinct tile is fetched
//! exactly once per batch, however many requested pixels fall inside it.
//! Distinct tiles are fetched concurrently and their pixels scattered back by
//! original position, so the result does not depend on completion order.

use crate::error::{Error, Result};
use crate::index::{TileAddress, TileGrid, TileRequest};
use crate::raster::{Argb, PixelIndex, Raster};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;

/// Default number of tiles fetched concurrently within one batch.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Provider of tile pixel data.
pub trait TileSource: Send + Sync {
    /// Resolve the raster holding the tile at `address`.
    fn fetch_tile(
        &self,
        address: &TileAddress,
    ) -> impl Future<Output = Result<Arc<dyn Raster>>> + Send;

    /// Release handles held by the source.
    fn dispose(&self) {}
}

/// Asynchronous pixel access, implemented by in-memory rasters and mosaics.
pub trait PixelSource: Send + Sync {
    /// `(width, height)` in pixels.
    fn dimensions(&self) -> (usize, usize);

    fn read_pixel(&self, i: usize, j: usize) -> impl Future<Output = Result<Argb>> + Send;

    /// Read many pixels in one call; `None` entries yield `0`.
    fn read_pixels(
        &self,
        coords: &[Option<PixelIndex>],
    ) -> impl Future<Output = Result<Vec<Argb>>> + Send;
}

impl<R: Raster> PixelSource for R {
    fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    fn read_pixel(&self, i: usize, j: usize) -> impl Future<Output = Result<Argb>> + Send {
        std::future::ready(self.pixel(i, j))
    }

    fn read_pixels(
        &self,
        coords: &[Option<PixelIndex>],
    ) -> impl Future<Output = Result<Vec<Argb>>> + Send {
        std::future::ready(self.pixels(coords))
    }
}

/// A `width x height` raster backed by a grid of tiles.
pub struct Mosaic<S> {
    grid: TileGrid,
    source: S,
    fetch_concurrency: usize,
}

impl<S: TileSource> Mosaic<S> {
    pub fn new(grid: TileGrid, source: S) -> Self {
        Self {
            grid,
            source,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Read one pixel through its owning tile.
    pub async fn pixel(&self, i: usize, j: usize) -> Result<Argb> {
        let (address, offset) = self.grid.locate(i, j)?;
        let tile = self.fetch(&address).await?;
        tokio::task::spawn_blocking(move || tile.pixel(offset.i, offset.j)).await?
    }

    /// Read many pixels, resolving each distinct tile once.
    pub async fn pixels(&self, coords: &[Option<PixelIndex>]) -> Result<Vec<Argb>> {
        let requests = self.grid.group(coords)?;
        let tiles_touched = requests.len();

        let results: Vec<Result<(TileRequest, Vec<Argb>)>> = stream::iter(requests)
            .map(|request| async move {
                let tile = self.fetch(&request.address).await?;
                let offsets: Vec<Option<PixelIndex>> =
                    request.offsets.iter().copied().map(Some).collect();
                // File-backed tiles seek and read
                let values = tokio::task::spawn_blocking(move || tile.pixels(&offsets)).await??;
                Ok((request, values))
            })
            .buffer_unordered(self.fetch_concurrency)
            .collect()
            .await;

        let mut out = vec![0; coords.len()];
        for result in results {
            let (request, values) = result?;
            for (&position, value) in request.positions.iter().zip(values) {
                out[position] = value;
            }
        }

        tracing::trace!(
            "Resolved {} pixels from {} tiles",
            coords.len(),
            tiles_touched
        );
        Ok(out)
    }

    /// Whole-image dumps are not offered by tiled storage.
    pub fn all_pixels(&self) -> Result<Vec<Argb>> {
        Err(Error::Unsupported("all_pixels"))
    }

    /// Cascade disposal to the tile source.
    pub fn dispose(&self) {
        self.source.dispose();
    }

    async fn fetch(&self, address: &TileAddress) -> Result<Arc<dyn Raster>> {
        let tile = self.source.fetch_tile(address).await?;
        if tile.width() != address.width || tile.height() != address.height {
            return Err(Error::TileSizeMismatch {
                key: format!("tile ({}, {})", address.tile_i, address.tile_j),
                expected: address.byte_len(),
                actual: tile.width() * tile.height() * crate::raster::BYTES_PER_PIXEL,
            });
        }
        Ok(tile)
    }
}

impl<S: TileSource> PixelSource for Mosaic<S> {
    fn dimensions(&self) -> (usize, usize) {
        (self.grid.width, self.grid.height)
    }

    fn read_pixel(&self, i: usize, j: usize) -> impl Future<Output = Result<Argb>> + Send {
        self.pixel(i, j)
    }

    fn read_pixels(
        &self,
        coords: &[Option<PixelIndex>],
    ) -> impl Future<Output = Result<Vec<Argb>>> + Send {
        self.pixels(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ArrayRaster;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves tiles cut from one in-memory raster, counting fetches.
    struct SlicedSource {
        full: ArrayRaster,
        fetches: AtomicUsize,
        disposed: AtomicUsize,
    }

    impl SlicedSource {
        fn new(width: usize, height: usize) -> Self {
            let pixels = (0..width * height).map(|p| p as Argb + 1).collect();
            Self {
                full: ArrayRaster::from_pixels(width, height, pixels).unwrap(),
                fetches: AtomicUsize::new(0),
                disposed: AtomicUsize::new(0),
            }
        }
    }

    impl TileSource for SlicedSource {
        async fn fetch_tile(&self, address: &TileAddress) -> Result<Arc<dyn Raster>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut tile = ArrayRaster::new(address.width, address.height);
            for j in 0..address.height {
                for i in 0..address.width {
                    let v = self.full.pixel(address.x + i, address.y + j)?;
                    tile.set_pixel(i, j, v)?;
                }
            }
            Ok(Arc::new(tile))
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn mosaic(width: usize, height: usize, tile: usize) -> Mosaic<SlicedSource> {
        let grid = TileGrid::new(width, height, tile, tile).unwrap();
        Mosaic::new(grid, SlicedSource::new(width, height))
    }

    #[tokio::test]
    async fn test_single_pixel() {
        let mosaic = mosaic(25, 17, 10);
        assert_eq!(mosaic.pixel(0, 0).await.unwrap(), 1);
        assert_eq!(mosaic.pixel(24, 16).await.unwrap(), 25 * 17);
        assert_eq!(mosaic.pixel(13, 2).await.unwrap(), 2 * 25 + 13 + 1);
        assert!(mosaic.pixel(25, 0).await.unwrap_err().is_boundary());
    }

    #[tokio::test]
    async fn test_batch_matches_single_reads() {
        let mosaic = mosaic(25, 17, 10).with_fetch_concurrency(3);
        let coords: Vec<Option<PixelIndex>> = (0..60)
            .map(|k| {
                if k % 7 == 3 {
                    None
                } else {
                    Some(PixelIndex::new((k * 11) % 25, (k * 5) % 17))
                }
            })
            .collect();

        let batch = mosaic.pixels(&coords).await.unwrap();
        for (k, coord) in coords.iter().enumerate() {
            match coord {
                Some(p) => assert_eq!(batch[k], mosaic.pixel(p.i, p.j).await.unwrap()),
                None => assert_eq!(batch[k], 0),
            }
        }
    }

    #[tokio::test]
    async fn test_batch_fetches_each_tile_once() {
        let mosaic = mosaic(20, 20, 10);
        let coords: Vec<Option<PixelIndex>> = (0..20)
            .flat_map(|j| (0..20).map(move |i| Some(PixelIndex::new(i, j))))
            .collect();

        mosaic.pixels(&coords).await.unwrap();
        assert_eq!(mosaic.source().fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mosaic = mosaic(20, 20, 10);
        assert!(mosaic.pixels(&[None, None]).await.unwrap() == vec![0, 0]);
        assert_eq!(mosaic.source().fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispose_cascades() {
        let mosaic = mosaic(20, 20, 10);
        mosaic.dispose();
        assert_eq!(mosaic.source().disposed.load(Ordering::SeqCst), 1);
        assert!(matches!(mosaic.all_pixels(), Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_raster_is_pixel_source() {
        let raster = ArrayRaster::from_pixels(2, 2, vec![5, 6, 7, 8]).unwrap();
        assert_eq!(raster.dimensions(), (2, 2));
        assert_eq!(raster.read_pixel(1, 1).await.unwrap(), 8);
        let values = raster
            .read_pixels(&[Some(PixelIndex::new(0, 1)), None])
            .await
            .unwrap();
        assert_eq!(values, vec![7, 0]);
    }
}

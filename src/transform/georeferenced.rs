//! Binding a pixel grid to geographic coordinates.
//!
//! Row 0 is the top of the image, i.e. the maximum native Y; the `j` axis is
//! flipped explicitly when converting between pixels and coordinates. Pixel
//! centres sit half a step inside the bounding box.

use super::mosaic::PixelSource;
use crate::crs::{Bounds, Projection};
use crate::error::{Error, Result};
use crate::raster::{Argb, ArrayRaster, PixelIndex, Raster};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A geographic point, `(longitude, latitude)` in degrees.
pub type LonLat = (f64, f64);

/// Axis-aligned extent in a projection's native units.
///
/// Always finite with `min <= max` on both axes; serialized as
/// `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Bounds", into = "Bounds")]
pub struct BoundingBox {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        let finite = [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite());
        if !finite || min_x > max_x || min_y > max_y {
            return Err(Error::MalformedBoundingBox(min_x, min_y, max_x, max_y));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// The whole world in geographic degrees.
    pub fn world() -> Self {
        Self {
            min_x: -180.0,
            min_y: -90.0,
            max_x: 180.0,
            max_y: 90.0,
        }
    }

    /// Parse `[min_x, min_y, max_x, max_y]` from a slice of exactly four values.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [min_x, min_y, max_x, max_y] => Self::new(*min_x, *min_y, *max_x, *max_y),
            _ => Err(Error::MalformedCoordinates(format!(
                "bounding box needs 4 values, got {}",
                values.len()
            ))),
        }
    }

    pub fn min_x(&self) -> f64 {
        self.min_x
    }

    pub fn min_y(&self) -> f64 {
        self.min_y
    }

    pub fn max_x(&self) -> f64 {
        self.max_x
    }

    pub fn max_y(&self) -> f64 {
        self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Inclusive containment test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn to_array(&self) -> Bounds {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// Western and eastern halves.
    pub fn halves(&self) -> [Self; 2] {
        let mid_x = (self.min_x + self.max_x) / 2.0;
        [
            Self { max_x: mid_x, ..*self },
            Self { min_x: mid_x, ..*self },
        ]
    }

    /// South-west, south-east, north-west and north-east quarters.
    pub fn quadrants(&self) -> [Self; 4] {
        let mid_y = (self.min_y + self.max_y) / 2.0;
        let [west, east] = self.halves();
        [
            Self { max_y: mid_y, ..west },
            Self { max_y: mid_y, ..east },
            Self { min_y: mid_y, ..west },
            Self { min_y: mid_y, ..east },
        ]
    }
}

impl TryFrom<Bounds> for BoundingBox {
    type Error = Error;

    fn try_from(b: Bounds) -> Result<Self> {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

impl From<BoundingBox> for Bounds {
    fn from(b: BoundingBox) -> Self {
        b.to_array()
    }
}

/// Pixel geometry of a `width x height` grid over `bbox` in `projection`.
#[derive(Debug, Clone)]
pub struct Georeference {
    width: usize,
    height: usize,
    bbox: BoundingBox,
    projection: Arc<Projection>,
    dx: f64,
    dy: f64,
    /// Native coordinates of the centre of the bottom-left pixel.
    start_x: f64,
    start_y: f64,
}

impl Georeference {
    pub fn new(width: usize, height: usize, bbox: BoundingBox, projection: Arc<Projection>) -> Self {
        let dx = if width > 0 { bbox.width() / width as f64 } else { 0.0 };
        let dy = if height > 0 { bbox.height() / height as f64 } else { 0.0 };
        Self {
            width,
            height,
            bbox,
            projection,
            dx,
            dy,
            start_x: bbox.min_x + dx / 2.0,
            start_y: bbox.min_y + dy / 2.0,
        }
    }

    /// Geographic lon/lat over the whole world.
    pub fn world(width: usize, height: usize) -> Self {
        Self::new(width, height, BoundingBox::world(), Arc::new(Projection::lon_lat()))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn projection(&self) -> &Arc<Projection> {
        &self.projection
    }

    /// Per-pixel step `(dx, dy)` in native units.
    pub fn resolution(&self) -> (f64, f64) {
        (self.dx, self.dy)
    }

    /// Native coordinates of the centre of pixel `(i, j)`.
    pub fn pixel_to_native(&self, i: usize, j: usize) -> Result<(f64, f64)> {
        if i >= self.width || j >= self.height {
            return Err(Error::out_of_bounds(
                i as i64,
                j as i64,
                self.width,
                self.height,
            ));
        }
        let flipped = self.height - 1 - j;
        Ok((
            self.start_x + i as f64 * self.dx,
            self.start_y + flipped as f64 * self.dy,
        ))
    }

    /// Geographic coordinates of the centre of pixel `(i, j)`.
    pub fn pixel_to_lon_lat(&self, i: usize, j: usize) -> Result<LonLat> {
        let (x, y) = self.pixel_to_native(i, j)?;
        self.projection.inverse(x, y)
    }

    /// Pixel nearest to a geographic point, or `None` when the point projects
    /// outside the bounding box.
    pub fn nearest_indices(&self, lon: f64, lat: f64) -> Result<Option<PixelIndex>> {
        if self.width == 0 || self.height == 0 {
            return Ok(None);
        }
        let (x, y) = self.projection.forward(lon, lat)?;
        if !self.bbox.contains(x, y) {
            return Ok(None);
        }
        let i = nearest_step(x, self.start_x, self.dx, self.width);
        let j = self.height - 1 - nearest_step(y, self.start_y, self.dy, self.height);
        Ok(Some(PixelIndex::new(i, j)))
    }

    /// Geographic point of the pixel at row-major `index` (`i + j * width`).
    pub fn lon_lat_at(&self, index: usize) -> Result<LonLat> {
        if self.width == 0 {
            return Err(Error::out_of_bounds(index as i64, 0, 0, self.height));
        }
        self.pixel_to_lon_lat(index % self.width, index / self.width)
    }

    /// Lazy, restartable sequence of every pixel's geographic point in
    /// row-major order, starting at the top-left pixel.
    pub fn lon_lat_sequence(&self) -> LonLatSequence<'_> {
        LonLatSequence {
            georef: self,
            next: 0,
            len: self.width * self.height,
        }
    }

    /// Nearest pixel for each point, computed in parallel. Absent points and
    /// points that fail to project map to `None`.
    pub fn nearest_index_batch(&self, points: &[Option<LonLat>]) -> Vec<Option<PixelIndex>> {
        points
            .par_iter()
            .map(|point| {
                point.and_then(|(lon, lat)| match self.nearest_indices(lon, lat) {
                    Ok(index) => index,
                    Err(e) => {
                        tracing::trace!("No source pixel for ({}, {}): {}", lon, lat, e);
                        None
                    }
                })
            })
            .collect()
    }
}

/// Rounded grid step along one axis, clamped so edge points stay addressable.
fn nearest_step(v: f64, start: f64, step: f64, n: usize) -> usize {
    if step == 0.0 {
        return 0;
    }
    let k = ((v - start) / step).round();
    k.clamp(0.0, (n - 1) as f64) as usize
}

/// Iterator returned by [`Georeference::lon_lat_sequence`].
#[derive(Debug, Clone)]
pub struct LonLatSequence<'a> {
    georef: &'a Georeference,
    next: usize,
    len: usize,
}

impl Iterator for LonLatSequence<'_> {
    type Item = Result<LonLat>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let item = self.georef.lon_lat_at(self.next);
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for LonLatSequence<'_> {}

/// A pixel source bound to a bounding box and projection.
pub struct GeoreferencedRaster<P> {
    georef: Georeference,
    source: P,
}

impl<P: PixelSource> GeoreferencedRaster<P> {
    pub fn new(source: P, bbox: BoundingBox, projection: Arc<Projection>) -> Self {
        let (width, height) = source.dimensions();
        let georef = Georeference::new(width, height, bbox, projection);
        Self { georef, source }
    }

    /// Geographic lon/lat spanning `[-180, -90, 180, 90]`.
    pub fn world(source: P) -> Self {
        Self::new(source, BoundingBox::world(), Arc::new(Projection::lon_lat()))
    }

    pub fn georeference(&self) -> &Georeference {
        &self.georef
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn into_source(self) -> P {
        self.source
    }

    pub fn pixel_to_lon_lat(&self, i: usize, j: usize) -> Result<LonLat> {
        self.georef.pixel_to_lon_lat(i, j)
    }

    pub fn nearest_indices(&self, lon: f64, lat: f64) -> Result<Option<PixelIndex>> {
        self.georef.nearest_indices(lon, lat)
    }

    /// Value of the pixel nearest to a geographic point.
    pub async fn nearest_pixel(&self, lon: f64, lat: f64) -> Result<Option<Argb>> {
        match self.georef.nearest_indices(lon, lat)? {
            Some(p) => Ok(Some(self.source.read_pixel(p.i, p.j).await?)),
            None => Ok(None),
        }
    }

    /// Values of the pixels nearest to many points, read in one batch.
    ///
    /// A point that is absent, falls outside the bounding box, or fails to
    /// project yields `None` without affecting the others.
    pub async fn nearest_pixels(&self, points: &[Option<LonLat>]) -> Result<Vec<Option<Argb>>> {
        let georef = self.georef.clone();
        let points = points.to_vec();
        let indices = tokio::task::spawn_blocking(move || georef.nearest_index_batch(&points)).await?;

        let values = self.source.read_pixels(&indices).await?;
        Ok(indices
            .iter()
            .zip(values)
            .map(|(index, value)| index.map(|_| value))
            .collect())
    }

    pub fn lon_lat_sequence(&self) -> LonLatSequence<'_> {
        self.georef.lon_lat_sequence()
    }
}

impl GeoreferencedRaster<ArrayRaster> {
    /// Write the pixel nearest to a geographic point. Returns `false` when the
    /// point lies outside the bounding box.
    pub fn set_nearest_pixel(&mut self, lon: f64, lat: f64, argb: Argb) -> Result<bool> {
        match self.georef.nearest_indices(lon, lat)? {
            Some(p) => {
                self.source.set_pixel(p.i, p.j, argb)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

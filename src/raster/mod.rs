//! Addressable pixel storage.
//!
//! Pixels are 32-bit ARGB values addressed by `(i, j)` with `(0, 0)` at the
//! top-left and `i` varying fastest. Every access is bounds-checked; an index
//! outside `[0, width) x [0, height)` is an error, never clamped.

mod file;

pub use file::FileRaster;

use crate::error::{Error, Result};

/// A 32-bit ARGB pixel value.
pub type Argb = u32;

/// Size in bytes of one encoded pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// A pixel position inside a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixelIndex {
    pub i: usize,
    pub j: usize,
}

impl PixelIndex {
    pub fn new(i: usize, j: usize) -> Self {
        Self { i, j }
    }

    /// Validate a signed index against raster dimensions.
    pub fn try_new(i: i64, j: i64, width: usize, height: usize) -> Result<Self> {
        if i < 0 || j < 0 || i as u64 >= width as u64 || j as u64 >= height as u64 {
            return Err(Error::out_of_bounds(i, j, width, height));
        }
        Ok(Self::new(i as usize, j as usize))
    }
}

/// Minimal capability contract for pixel storage.
///
/// Optional capabilities (`all_pixels`, `set_pixel`) report
/// [`Error::Unsupported`] unless a variant overrides them.
pub trait Raster: Send + Sync {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Read one pixel.
    fn pixel(&self, i: usize, j: usize) -> Result<Argb>;

    /// Read many pixels; `None` entries yield `0`.
    fn pixels(&self, coords: &[Option<PixelIndex>]) -> Result<Vec<Argb>> {
        coords
            .iter()
            .map(|c| match c {
                Some(p) => self.pixel(p.i, p.j),
                None => Ok(0),
            })
            .collect()
    }

    /// Every pixel in row-major order.
    fn all_pixels(&self) -> Result<Vec<Argb>> {
        Err(Error::Unsupported("all_pixels"))
    }

    fn set_pixel(&mut self, _i: usize, _j: usize, _argb: Argb) -> Result<()> {
        Err(Error::Unsupported("set_pixel"))
    }

    /// Release held resources. Later reads may fail with [`Error::Disposed`].
    fn dispose(&self) {}

    fn check_bounds(&self, i: usize, j: usize) -> Result<()> {
        if i >= self.width() || j >= self.height() {
            return Err(Error::out_of_bounds(
                i as i64,
                j as i64,
                self.width(),
                self.height(),
            ));
        }
        Ok(())
    }
}

/// In-memory raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayRaster {
    width: usize,
    height: usize,
    data: Vec<Argb>,
}

impl ArrayRaster {
    /// A zero-filled raster.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    pub fn from_pixels(width: usize, height: usize, data: Vec<Argb>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::MalformedCoordinates(format!(
                "{} pixels supplied for a {}x{} raster",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Decode raw big-endian ARGB bytes; `key` names the data in errors.
    pub fn from_be_bytes(key: &str, width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        let expected = width * height * BYTES_PER_PIXEL;
        if bytes.len() != expected {
            return Err(Error::TileSizeMismatch {
                key: key.to_string(),
                expected,
                actual: bytes.len(),
            });
        }
        let data = bytes
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Encode as raw big-endian ARGB bytes.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        encode_be(&self.data)
    }

    pub fn as_slice(&self) -> &[Argb] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<Argb> {
        self.data
    }
}

impl Raster for ArrayRaster {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn pixel(&self, i: usize, j: usize) -> Result<Argb> {
        self.check_bounds(i, j)?;
        Ok(self.data[j * self.width + i])
    }

    fn all_pixels(&self) -> Result<Vec<Argb>> {
        Ok(self.data.clone())
    }

    fn set_pixel(&mut self, i: usize, j: usize, argb: Argb) -> Result<()> {
        self.check_bounds(i, j)?;
        self.data[j * self.width + i] = argb;
        Ok(())
    }
}

/// All-zero raster standing in for tiles with no stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyRaster {
    width: usize,
    height: usize,
}

impl EmptyRaster {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

impl Raster for EmptyRaster {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn pixel(&self, i: usize, j: usize) -> Result<Argb> {
        self.check_bounds(i, j)?;
        Ok(0)
    }

    fn all_pixels(&self) -> Result<Vec<Argb>> {
        Ok(vec![0; self.width * self.height])
    }
}

/// Encode pixels as raw big-endian ARGB bytes.
pub fn encode_be(pixels: &[Argb]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() * BYTES_PER_PIXEL);
    for p in pixels {
        out.extend_from_slice(&p.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_enforcement() {
        let raster = ArrayRaster::new(10, 10);
        assert!(PixelIndex::try_new(-1, 0, 10, 10).unwrap_err().is_boundary());
        assert!(raster.pixel(10, 0).unwrap_err().is_boundary());
        assert!(raster.pixel(0, 10).unwrap_err().is_boundary());
        assert!(raster.pixel(9, 9).is_ok());
        assert_eq!(PixelIndex::try_new(3, 4, 10, 10).unwrap(), PixelIndex::new(3, 4));
    }

    #[test]
    fn test_set_and_get() {
        let mut raster = ArrayRaster::new(3, 2);
        raster.set_pixel(2, 1, 0xFF00_FF00).unwrap();
        assert_eq!(raster.pixel(2, 1).unwrap(), 0xFF00_FF00);
        assert_eq!(raster.as_slice()[5], 0xFF00_FF00);
        assert!(raster.set_pixel(3, 0, 1).is_err());
    }

    #[test]
    fn test_batch_read_skips_missing() {
        let raster = ArrayRaster::from_pixels(2, 2, vec![1, 2, 3, 4]).unwrap();
        let coords = [
            Some(PixelIndex::new(1, 1)),
            None,
            Some(PixelIndex::new(0, 1)),
        ];
        assert_eq!(raster.pixels(&coords).unwrap(), vec![4, 0, 3]);
    }

    #[test]
    fn test_big_endian_layout() {
        let raster = ArrayRaster::from_pixels(2, 1, vec![0x0102_0304, 0xAABB_CCDD]).unwrap();
        let bytes = raster.to_be_bytes();
        assert_eq!(bytes, vec![1, 2, 3, 4, 0xAA, 0xBB, 0xCC, 0xDD]);

        let decoded = ArrayRaster::from_be_bytes("k", 2, 1, &bytes).unwrap();
        assert_eq!(decoded, raster);
    }

    #[test]
    fn test_wrong_byte_length_rejected() {
        let err = ArrayRaster::from_be_bytes("tile", 2, 2, &[0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            Error::TileSizeMismatch {
                expected: 16,
                actual: 15,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_raster() {
        let empty = EmptyRaster::new(4, 3);
        assert_eq!(empty.pixel(3, 2).unwrap(), 0);
        assert!(empty.pixel(4, 0).is_err());
        assert_eq!(empty.all_pixels().unwrap(), vec![0; 12]);

        let mut empty = empty;
        assert!(matches!(
            empty.set_pixel(0, 0, 1),
            Err(Error::Unsupported("set_pixel"))
        ));
    }
}

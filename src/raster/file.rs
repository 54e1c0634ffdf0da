//! Raster backed by a region of a headerless pixel file.
//!
//! Positioned reads on one handle are not composable across threads, so every
//! read holds the handle's mutex for its seek and read.

use super::{Argb, PixelIndex, Raster, BYTES_PER_PIXEL};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct FileRaster {
    path: PathBuf,
    file: Mutex<Option<File>>,
    /// Byte offset of pixel (0, 0).
    offset: u64,
    width: usize,
    height: usize,
}

impl FileRaster {
    /// Open a file holding exactly `width * height` big-endian ARGB pixels.
    pub fn open(path: impl AsRef<Path>, width: usize, height: usize) -> Result<Self> {
        let path = path.as_ref();
        let len = std::fs::metadata(path)?.len();
        let expected = (width * height * BYTES_PER_PIXEL) as u64;
        if len != expected {
            return Err(Error::TileSizeMismatch {
                key: path.display().to_string(),
                expected: expected as usize,
                actual: len as usize,
            });
        }
        Self::open_region(path, 0, width, height)
    }

    /// Open a `width x height` window starting `offset` bytes into the file.
    pub fn open_region(
        path: impl AsRef<Path>,
        offset: u64,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            offset,
            width,
            height,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_disposed(&self) -> bool {
        self.file.lock().map(|f| f.is_none()).unwrap_or(true)
    }

    fn byte_offset(&self, i: usize, j: usize) -> u64 {
        self.offset + ((j * self.width + i) * BYTES_PER_PIXEL) as u64
    }

    fn read_at(file: &mut File, pos: u64, buf: &mut [u8]) -> Result<()> {
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let file = guard.as_mut().ok_or(Error::Disposed)?;
        f(file)
    }
}

impl Raster for FileRaster {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn pixel(&self, i: usize, j: usize) -> Result<Argb> {
        self.check_bounds(i, j)?;
        let pos = self.byte_offset(i, j);
        let mut buf = [0u8; BYTES_PER_PIXEL];
        self.with_file(|file| Self::read_at(file, pos, &mut buf))?;
        Ok(u32::from_be_bytes(buf))
    }

    /// One lock for the whole batch.
    fn pixels(&self, coords: &[Option<PixelIndex>]) -> Result<Vec<Argb>> {
        for p in coords.iter().flatten() {
            self.check_bounds(p.i, p.j)?;
        }
        self.with_file(|file| {
            let mut buf = [0u8; BYTES_PER_PIXEL];
            coords
                .iter()
                .map(|c| match c {
                    Some(p) => {
                        Self::read_at(file, self.byte_offset(p.i, p.j), &mut buf)?;
                        Ok(u32::from_be_bytes(buf))
                    }
                    None => Ok(0),
                })
                .collect()
        })
    }

    fn all_pixels(&self) -> Result<Vec<Argb>> {
        let mut bytes = vec![0u8; self.width * self.height * BYTES_PER_PIXEL];
        self.with_file(|file| Self::read_at(file, self.offset, &mut bytes))?;
        Ok(bytes
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn dispose(&self) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            tracing::debug!("Closed {}", self.path.display());
        }
    }
}

//! Error types for the raster core.
//!
//! Pure computation (projection, indexing, tile keys) reports typed errors so
//! callers can tell boundary violations from malformed input. The application
//! edge (config, CLI, service wiring) wraps these in `anyhow`.

use thiserror::Error;

/// Failure of a single coordinate transform.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ProjectionError {
    /// The point maps onto the projection's undefined point.
    #[error("point ({0:.6}, {1:.6}) is singular for this projection")]
    Singular(f64, f64),

    /// An iterative inverse did not settle within its iteration budget.
    #[error("inverse transform did not converge after {0} iterations")]
    NoConvergence(usize),
}

/// Errors raised by the raster, mosaic and cache layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("index ({i}, {j}) outside raster of {width}x{height}")]
    OutOfBounds {
        i: i64,
        j: i64,
        width: usize,
        height: usize,
    },

    #[error("tile index {index} outside grid of {count} tiles along {axis}")]
    TileOutOfRange {
        axis: &'static str,
        index: usize,
        count: usize,
    },

    #[error("malformed bounding box [{0}, {1}, {2}, {3}]: min must not exceed max")]
    MalformedBoundingBox(f64, f64, f64, f64),

    #[error("malformed coordinates: {0}")]
    MalformedCoordinates(String),

    #[error("malformed tile key '{key}': {reason}")]
    MalformedTileKey { key: String, reason: String },

    #[error("tile data for '{key}' is {actual} bytes, expected {expected}")]
    TileSizeMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("tile of {width}x{height} needs {bytes} bytes, over the {budget} byte budget")]
    TileTooLarge {
        width: usize,
        height: usize,
        bytes: usize,
        budget: usize,
    },

    #[error("invalid mosaic: {0}")]
    InvalidMosaic(String),

    #[error("operation '{0}' is not supported by this raster")]
    Unsupported(&'static str),

    #[error("unsupported CRS code '{0}'")]
    UnsupportedCrs(String),

    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    #[error("invalid map request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("raster has been disposed")]
    Disposed,

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] object_store::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Boundary error for a signed pixel index.
    pub fn out_of_bounds(i: i64, j: i64, width: usize, height: usize) -> Self {
        Error::OutOfBounds {
            i,
            j,
            width,
            height,
        }
    }

    pub fn malformed_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedTileKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a boundary violation.
    pub fn is_boundary(&self) -> bool {
        matches!(self, Error::OutOfBounds { .. } | Error::TileOutOfRange { .. })
    }
}

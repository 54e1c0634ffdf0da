//! Coordinate reference systems.
//!
//! A closed set of projections is supported:
//!
//! - **Geographic lon/lat** (`CRS:84`, `EPSG:4326`): identity transform.
//! - **Universal Polar Stereographic** (`EPSG:32661`, `EPSG:32761`).
//! - **UTM** (`EPSG:326zz` north, `EPSG:327zz` south), transverse Mercator on WGS84.
//!
//! Custom stereographic and transverse Mercator projections can be built from
//! [`ProjectionParams`] and added to a [`ProjectionRegistry`].
//!
//! ## Coordinate order convention:
//!
//! - Points are `(x, y)` = `(lon, lat)` for geographic coordinates, in degrees.
//! - Bounds arrays: `[min_x, min_y, max_x, max_y]` = `[west, south, east, north]`

mod ellipsoid;
mod projection;
mod stereographic;
mod tmerc;

pub use ellipsoid::{
    normalize_latitude, normalize_longitude, Ellipsoid, INVERSE_EPSILON, INVERSE_MAX_ITERATIONS,
};
pub use projection::{Projection, ProjectionKind, ProjectionParams};
pub use stereographic::{Stereographic, StereographicMode};
pub use tmerc::{utm_central_meridian, utm_row, utm_zone, Hemisphere, TransverseMercator};

/// Well-known CRS codes.
pub mod codes {
    /// OGC lon/lat axis order WGS84.
    pub const CRS84: &str = "CRS:84";

    /// WGS84 geographic coordinate system (lon/lat in degrees).
    pub const WGS84: &str = "EPSG:4326";

    /// Universal Polar Stereographic, north.
    pub const UPS_NORTH: &str = "EPSG:32661";

    /// Universal Polar Stereographic, south.
    pub const UPS_SOUTH: &str = "EPSG:32761";
}

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Bounds in a specific CRS: [min_x, min_y, max_x, max_y]
pub type Bounds = [f64; 4];

/// Thread-safe lookup of projections by CRS code.
///
/// Pre-populated with the geographic and UPS projections; UTM codes are
/// built on first use and cached.
pub struct ProjectionRegistry {
    by_code: RwLock<HashMap<String, Arc<Projection>>>,
}

impl Default for ProjectionRegistry {
    fn default() -> Self {
        let registry = Self {
            by_code: RwLock::new(HashMap::new()),
        };
        registry.register(Projection::lon_lat());
        registry.register(Projection::ups_north());
        registry.register(Projection::ups_south());
        registry
    }
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a projection under each of its codes, replacing earlier entries.
    pub fn register(&self, projection: Projection) -> Arc<Projection> {
        let projection = Arc::new(projection);
        let mut map = self.by_code.write().unwrap_or_else(|e| e.into_inner());
        for code in projection.codes() {
            map.insert(code.to_ascii_uppercase(), projection.clone());
        }
        projection
    }

    /// Look up a projection by code (case-insensitive).
    pub fn get(&self, code: &str) -> Result<Arc<Projection>> {
        let key = code.trim().to_ascii_uppercase();

        {
            let map = self.by_code.read().unwrap_or_else(|e| e.into_inner());
            if let Some(proj) = map.get(&key) {
                return Ok(proj.clone());
            }
        }

        let (zone, hemisphere) =
            parse_utm_code(&key).ok_or_else(|| Error::UnsupportedCrs(code.to_string()))?;
        let projection = Projection::utm(zone, hemisphere)?;
        tracing::debug!("Built {} for {}", projection.name(), key);
        Ok(self.register(projection))
    }

    /// Whether `code` resolves to a projection.
    pub fn supports(&self, code: &str) -> bool {
        self.get(code).is_ok()
    }

    /// Codes registered so far, sorted.
    pub fn codes(&self) -> Vec<String> {
        let map = self.by_code.read().unwrap_or_else(|e| e.into_inner());
        let mut codes: Vec<String> = map.keys().cloned().collect();
        codes.sort();
        codes
    }
}

/// Parse `EPSG:326zz` / `EPSG:327zz` into a UTM zone.
fn parse_utm_code(code: &str) -> Option<(u8, Hemisphere)> {
    let number: u32 = code.strip_prefix("EPSG:")?.parse().ok()?;
    let (hemisphere, zone) = match number {
        32601..=32660 => (Hemisphere::North, number - 32600),
        32701..=32760 => (Hemisphere::South, number - 32700),
        _ => return None,
    };
    Some((zone as u8, hemisphere))
}

/// Project geographic bounds into `projection`'s native units.
///
/// Samples points along edges to handle non-linear projections; samples that
/// fail to project are skipped.
pub fn project_bounds(bounds: &Bounds, projection: &Projection, n_samples: usize) -> Result<Bounds> {
    let n_samples = n_samples.max(1);
    let mut min_x = f64::MAX;
    let mut min_y = f64::MAX;
    let mut max_x = f64::MIN;
    let mut max_y = f64::MIN;

    let mut include = |lon: f64, lat: f64| {
        if let Ok((x, y)) = projection.forward(lon, lat) {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    };

    for i in 0..=n_samples {
        let t = i as f64 / n_samples as f64;
        let lon = bounds[0] + t * (bounds[2] - bounds[0]);
        include(lon, bounds[1]);
        include(lon, bounds[3]);
        let lat = bounds[1] + t * (bounds[3] - bounds[1]);
        include(bounds[0], lat);
        include(bounds[2], lat);
    }

    if min_x > max_x || min_y > max_y {
        return Err(Error::MalformedCoordinates(format!(
            "no point of {:?} projects into {}",
            bounds,
            projection.name()
        )));
    }
    Ok([min_x, min_y, max_x, max_y])
}

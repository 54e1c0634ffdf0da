//! Named projections with degree/metre boundaries over the radian kernels.

use super::ellipsoid::{normalize_longitude, Ellipsoid};
use super::stereographic::Stereographic;
use super::tmerc::{
    utm_central_meridian, Hemisphere, TransverseMercator, UTM_FALSE_EASTING, UTM_SCALE_FACTOR,
    UTM_SOUTH_FALSE_NORTHING,
};
use super::codes;
use crate::error::{Error, ProjectionError, Result};

/// Projection variant together with its derived constants.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionKind {
    /// Geographic longitude/latitude in degrees, passed through unchanged.
    LonLat,
    Stereographic(Stereographic),
    TransverseMercator(TransverseMercator),
}

/// Parameters shared by the projected variants, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionParams {
    pub ellipsoid: Ellipsoid,
    pub lon0: f64,
    pub lat0: f64,
    /// Latitude of true scale (stereographic only).
    pub lat_ts: f64,
    pub scale_factor: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            ellipsoid: Ellipsoid::WGS84,
            lon0: 0.0,
            lat0: 0.0,
            lat_ts: 0.0,
            scale_factor: 1.0,
            false_easting: 0.0,
            false_northing: 0.0,
        }
    }
}

/// An immutable, named coordinate transform pair.
///
/// `forward` takes longitude/latitude in degrees and returns native
/// coordinates (metres for projected kinds); `inverse` undoes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    name: String,
    codes: Vec<String>,
    kind: ProjectionKind,
    /// Central meridian in radians.
    lon0: f64,
    a: f64,
    false_easting: f64,
    false_northing: f64,
}

impl Projection {
    /// Identity geographic projection.
    pub fn lon_lat() -> Self {
        Self {
            name: "Geographic lon/lat".to_string(),
            codes: vec![codes::CRS84.to_string(), codes::WGS84.to_string()],
            kind: ProjectionKind::LonLat,
            lon0: 0.0,
            a: 1.0,
            false_easting: 0.0,
            false_northing: 0.0,
        }
    }

    pub fn stereographic(name: impl Into<String>, params: ProjectionParams) -> Self {
        let kernel = Stereographic::new(
            &params.ellipsoid,
            params.lat0.to_radians(),
            params.lat_ts.to_radians(),
            params.scale_factor,
        );
        Self::projected(name.into(), ProjectionKind::Stereographic(kernel), &params)
    }

    pub fn transverse_mercator(name: impl Into<String>, params: ProjectionParams) -> Self {
        let kernel = TransverseMercator::new(
            &params.ellipsoid,
            params.lat0.to_radians(),
            params.scale_factor,
        );
        Self::projected(name.into(), ProjectionKind::TransverseMercator(kernel), &params)
    }

    /// Universal Polar Stereographic, north aspect (EPSG:32661).
    pub fn ups_north() -> Self {
        Self::stereographic("UPS North", Self::ups_params(90.0))
            .with_codes([codes::UPS_NORTH])
    }

    /// Universal Polar Stereographic, south aspect (EPSG:32761).
    pub fn ups_south() -> Self {
        Self::stereographic("UPS South", Self::ups_params(-90.0))
            .with_codes([codes::UPS_SOUTH])
    }

    fn ups_params(lat0: f64) -> ProjectionParams {
        ProjectionParams {
            lat0,
            lat_ts: 90.0,
            scale_factor: 0.994,
            false_easting: 2_000_000.0,
            false_northing: 2_000_000.0,
            ..Default::default()
        }
    }

    /// WGS84 UTM zone `zone` (1..=60).
    pub fn utm(zone: u8, hemisphere: Hemisphere) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(Error::UnsupportedCrs(format!("UTM zone {}", zone)));
        }
        let (suffix, false_northing, base) = match hemisphere {
            Hemisphere::North => ('N', 0.0, 32600),
            Hemisphere::South => ('S', UTM_SOUTH_FALSE_NORTHING, 32700),
        };
        let params = ProjectionParams {
            lon0: utm_central_meridian(zone).to_degrees(),
            scale_factor: UTM_SCALE_FACTOR,
            false_easting: UTM_FALSE_EASTING,
            false_northing,
            ..Default::default()
        };
        let code = format!("EPSG:{}", base + u32::from(zone));
        Ok(Self::transverse_mercator(format!("UTM zone {}{}", zone, suffix), params)
            .with_codes([code]))
    }

    fn projected(name: String, kind: ProjectionKind, params: &ProjectionParams) -> Self {
        Self {
            name,
            codes: Vec::new(),
            kind,
            lon0: params.lon0.to_radians(),
            a: params.ellipsoid.a,
            false_easting: params.false_easting,
            false_northing: params.false_northing,
        }
    }

    /// Replace the identifying codes.
    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn kind(&self) -> &ProjectionKind {
        &self.kind
    }

    /// Case-insensitive code match.
    pub fn has_code(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c.eq_ignore_ascii_case(code))
    }

    pub fn is_conformal(&self) -> bool {
        !matches!(self.kind, ProjectionKind::LonLat)
    }

    pub fn has_inverse(&self) -> bool {
        true
    }

    /// Project geographic degrees into native coordinates.
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
            return Err(Error::MalformedCoordinates(format!(
                "({}, {}) is not a valid longitude/latitude",
                lon, lat
            )));
        }

        let lam = normalize_longitude(lon.to_radians() - self.lon0);
        let phi = lat.to_radians();
        let (x, y) = match &self.kind {
            ProjectionKind::LonLat => return Ok((lon, lat)),
            ProjectionKind::Stereographic(k) => k.project(lam, phi),
            ProjectionKind::TransverseMercator(k) => k.project(lam, phi),
        }
        .map_err(|e| in_degrees(e, lon, lat))?;

        Ok((
            self.a * x + self.false_easting,
            self.a * y + self.false_northing,
        ))
    }

    /// Unproject native coordinates into geographic degrees.
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(Error::MalformedCoordinates(format!(
                "({}, {}) is not a finite coordinate",
                x, y
            )));
        }

        let xn = (x - self.false_easting) / self.a;
        let yn = (y - self.false_northing) / self.a;
        let (lam, phi) = match &self.kind {
            ProjectionKind::LonLat => return Ok((x, y)),
            ProjectionKind::Stereographic(k) => k.project_inverse(xn, yn),
            ProjectionKind::TransverseMercator(k) => k.project_inverse(xn, yn),
        }
        .map_err(|e| in_degrees(e, x, y))?;

        Ok((
            normalize_longitude(lam + self.lon0).to_degrees(),
            phi.to_degrees(),
        ))
    }
}

/// Report singular points in the caller's coordinates.
fn in_degrees(err: ProjectionError, u: f64, v: f64) -> ProjectionError {
    match err {
        ProjectionError::Singular(..) => ProjectionError::Singular(u, v),
        other => other,
    }
}

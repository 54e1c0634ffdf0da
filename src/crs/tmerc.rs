//! Transverse Mercator projection and UTM zone helpers.

use super::ellipsoid::{enfn, inv_mlfn, mlfn, normalize_longitude, Ellipsoid, EPS10};
use crate::error::ProjectionError;
use std::f64::consts::{FRAC_PI_2, PI};

const FC1: f64 = 1.0;
const FC2: f64 = 0.5;
const FC3: f64 = 1.0 / 6.0;
const FC4: f64 = 1.0 / 12.0;
const FC5: f64 = 0.05;
const FC6: f64 = 1.0 / 30.0;
const FC7: f64 = 1.0 / 42.0;
const FC8: f64 = 1.0 / 56.0;

/// UTM scale factor on the central meridian.
pub const UTM_SCALE_FACTOR: f64 = 0.9996;
pub const UTM_FALSE_EASTING: f64 = 500_000.0;
pub const UTM_SOUTH_FALSE_NORTHING: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hemisphere {
    North,
    South,
}

/// Derived constants of a transverse Mercator projection.
#[derive(Debug, Clone, PartialEq)]
pub struct TransverseMercator {
    es: f64,
    phi0: f64,
    k0: f64,
    esp: f64,
    ml0: f64,
    /// Meridian distance coefficients; `None` on the sphere.
    en: Option<[f64; 5]>,
}

impl TransverseMercator {
    pub fn new(ellipsoid: &Ellipsoid, lat0: f64, k0: f64) -> Self {
        if ellipsoid.is_sphere() {
            Self {
                es: 0.0,
                phi0: lat0,
                k0,
                esp: k0,
                ml0: 0.5 * k0,
                en: None,
            }
        } else {
            let es = ellipsoid.es;
            let en = enfn(es);
            Self {
                es,
                phi0: lat0,
                k0,
                esp: es / (1.0 - es),
                ml0: mlfn(lat0, lat0.sin(), lat0.cos(), &en),
                en: Some(en),
            }
        }
    }

    pub fn is_spherical(&self) -> bool {
        self.en.is_none()
    }

    pub fn scale_factor(&self) -> f64 {
        self.k0
    }

    pub(crate) fn project(&self, lam: f64, phi: f64) -> Result<(f64, f64), ProjectionError> {
        let Some(en) = &self.en else {
            return self.project_sphere(lam, phi);
        };

        let es = self.es;
        let (sinphi, cosphi) = phi.sin_cos();
        let mut t = if cosphi.abs() > EPS10 { sinphi / cosphi } else { 0.0 };
        t *= t;
        let mut al = cosphi * lam;
        let als = al * al;
        al /= (1.0 - es * sinphi * sinphi).sqrt();
        let n = self.esp * cosphi * cosphi;

        let x = self.k0
            * al
            * (FC1
                + FC3
                    * als
                    * (1.0 - t
                        + n
                        + FC5
                            * als
                            * (5.0 + t * (t - 18.0) + n * (14.0 - 58.0 * t)
                                + FC7 * als * (61.0 + t * (t * (179.0 - t) - 479.0)))));
        let y = self.k0
            * (mlfn(phi, sinphi, cosphi, en) - self.ml0
                + sinphi
                    * al
                    * lam
                    * FC2
                    * (1.0
                        + FC4
                            * als
                            * (5.0 - t
                                + n * (9.0 + 4.0 * n)
                                + FC6
                                    * als
                                    * (61.0 + t * (t - 58.0) + n * (270.0 - 330.0 * t)
                                        + FC8 * als * (1385.0 + t * (t * (543.0 - t) - 3111.0))))));
        Ok((x, y))
    }

    pub(crate) fn project_inverse(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let Some(en) = &self.en else {
            return Ok(self.inverse_sphere(x, y));
        };

        let es = self.es;
        let mut phi = inv_mlfn(self.ml0 + y / self.k0, es, en)?;
        if phi.abs() >= FRAC_PI_2 {
            let phi = if y < 0.0 { -FRAC_PI_2 } else { FRAC_PI_2 };
            return Ok((0.0, phi));
        }

        let (sinphi, cosphi) = phi.sin_cos();
        let mut t = if cosphi.abs() > EPS10 { sinphi / cosphi } else { 0.0 };
        let n = self.esp * cosphi * cosphi;
        let mut con = 1.0 - es * sinphi * sinphi;
        let d = x * con.sqrt() / self.k0;
        con *= t;
        t *= t;
        let ds = d * d;

        phi -= (con * ds / (1.0 - es))
            * FC2
            * (1.0
                - ds * FC4
                    * (5.0 + t * (3.0 - 9.0 * n) + n * (1.0 - 4.0 * n)
                        - ds * FC6
                            * (61.0 + t * (90.0 - 252.0 * n + 45.0 * t) + 46.0 * n
                                - ds * FC8 * (1385.0 + t * (3633.0 + t * (4095.0 + 1574.0 * t))))));
        let lam = d
            * (FC1
                - ds * FC3
                    * (1.0 + 2.0 * t + n
                        - ds * FC5
                            * (5.0 + t * (28.0 + 24.0 * t + 8.0 * n) + 6.0 * n
                                - ds * FC7 * (61.0 + t * (662.0 + t * (1320.0 + 720.0 * t))))))
            / cosphi;
        Ok((lam, phi))
    }

    fn project_sphere(&self, lam: f64, phi: f64) -> Result<(f64, f64), ProjectionError> {
        let cosphi = phi.cos();
        let b = cosphi * lam.sin();
        if (b.abs() - 1.0).abs() <= EPS10 {
            return Err(ProjectionError::Singular(lam, phi));
        }

        let x = self.ml0 * ((1.0 + b) / (1.0 - b)).ln();
        let mut y = cosphi * lam.cos() / (1.0 - b * b).sqrt();
        y = if y.abs() >= 1.0 { 0.0 } else { y.acos() };
        if phi < 0.0 {
            y = -y;
        }
        Ok((x, self.esp * (y - self.phi0)))
    }

    fn inverse_sphere(&self, x: f64, y: f64) -> (f64, f64) {
        let h = (x / self.esp).exp();
        let g = 0.5 * (h - 1.0 / h);
        let d = self.phi0 + y / self.esp;
        let h = d.cos();
        let mut phi = ((1.0 - h * h) / (1.0 + g * g)).sqrt().clamp(-1.0, 1.0).asin();
        if d < 0.0 {
            phi = -phi;
        }
        let lam = if g != 0.0 || h != 0.0 { g.atan2(h) } else { 0.0 };
        (lam, phi)
    }
}

/// Central meridian (radians) of a UTM zone.
pub fn utm_central_meridian(zone: u8) -> f64 {
    (f64::from(zone) - 1.0 + 0.5) * PI / 30.0 - PI
}

/// UTM zone (1..=60) whose band contains `lon` (radians).
pub fn utm_zone(lon: f64) -> u8 {
    let zone = ((normalize_longitude(lon) + PI) * 30.0 / PI).floor() + 1.0;
    zone.clamp(1.0, 60.0) as u8
}

/// Latitude row band index for `lat` (radians): 0 outside -80..84 degrees.
pub fn utm_row(lat: f64) -> u8 {
    let degrees = lat.to_degrees().clamp(-90.0, 90.0).trunc() as i32;
    if !(-80..=84).contains(&degrees) {
        return 0;
    }
    if degrees > 80 {
        return 24;
    }
    ((degrees + 80) / 8 + 3) as u8
}

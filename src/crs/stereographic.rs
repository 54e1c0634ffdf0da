//! Stereographic azimuthal projection (polar, equatorial and oblique aspects).
//!
//! Kernels work on the unit ellipsoid in radians with the central meridian
//! already removed; `Projection` applies the axis scale and false origin.

use super::ellipsoid::{
    ssfn, tsfn, Ellipsoid, EPS10, INVERSE_EPSILON, INVERSE_MAX_ITERATIONS,
};
use crate::error::ProjectionError;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

/// Aspect, chosen from the distance of the origin latitude to a pole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StereographicMode {
    NorthPole,
    SouthPole,
    Equator,
    Oblique,
}

impl StereographicMode {
    fn from_origin(lat0: f64) -> Self {
        if (lat0.abs() - FRAC_PI_2).abs() < EPS10 {
            if lat0 < 0.0 {
                StereographicMode::SouthPole
            } else {
                StereographicMode::NorthPole
            }
        } else if lat0.abs() > EPS10 {
            StereographicMode::Oblique
        } else {
            StereographicMode::Equator
        }
    }

    fn is_polar(self) -> bool {
        matches!(self, StereographicMode::NorthPole | StereographicMode::SouthPole)
    }
}

/// Derived constants of one stereographic projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Stereographic {
    mode: StereographicMode,
    /// Eccentricity; zero selects the spherical formulas.
    e: f64,
    phi0: f64,
    akm1: f64,
    /// Sine/cosine of the conformal (ellipsoid) or geodetic (sphere) origin latitude.
    sin_x1: f64,
    cos_x1: f64,
}

impl Stereographic {
    /// Set up for origin latitude `lat0`, latitude of true scale `lat_ts`
    /// (radians) and scale factor `k0`.
    pub fn new(ellipsoid: &Ellipsoid, lat0: f64, lat_ts: f64, k0: f64) -> Self {
        let mode = StereographicMode::from_origin(lat0);
        let e = ellipsoid.eccentricity();
        let phits = lat_ts.abs();

        let mut sin_x1 = 0.0;
        let mut cos_x1 = 1.0;
        let akm1;

        if ellipsoid.is_sphere() {
            akm1 = match mode {
                StereographicMode::Oblique => {
                    sin_x1 = lat0.sin();
                    cos_x1 = lat0.cos();
                    2.0 * k0
                }
                StereographicMode::Equator => 2.0 * k0,
                _ if (phits - FRAC_PI_2).abs() >= EPS10 => {
                    phits.cos() / (FRAC_PI_4 - 0.5 * phits).tan()
                }
                _ => 2.0 * k0,
            };
        } else {
            akm1 = match mode {
                StereographicMode::NorthPole | StereographicMode::SouthPole => {
                    if (phits - FRAC_PI_2).abs() < EPS10 {
                        2.0 * k0 / ((1.0 + e).powf(1.0 + e) * (1.0 - e).powf(1.0 - e)).sqrt()
                    } else {
                        let sinphits = phits.sin();
                        let t = e * sinphits;
                        phits.cos() / tsfn(phits, sinphits, e) / (1.0 - t * t).sqrt()
                    }
                }
                StereographicMode::Oblique => {
                    let sinph0 = lat0.sin();
                    let x = 2.0 * ssfn(lat0, sinph0, e).atan() - FRAC_PI_2;
                    let t = e * sinph0;
                    sin_x1 = x.sin();
                    cos_x1 = x.cos();
                    2.0 * k0 * lat0.cos() / (1.0 - t * t).sqrt()
                }
                StereographicMode::Equator => 2.0 * k0,
            };
        }

        Self {
            mode,
            e,
            phi0: lat0,
            akm1,
            sin_x1,
            cos_x1,
        }
    }

    pub fn mode(&self) -> StereographicMode {
        self.mode
    }

    pub(crate) fn project(&self, lam: f64, phi: f64) -> Result<(f64, f64), ProjectionError> {
        if self.e == 0.0 {
            self.project_sphere(lam, phi)
        } else {
            self.project_ellipsoid(lam, phi)
        }
    }

    pub(crate) fn project_inverse(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        if self.e == 0.0 {
            Ok(self.inverse_sphere(x, y))
        } else {
            self.inverse_ellipsoid(x, y)
        }
    }

    fn project_ellipsoid(&self, lam: f64, phi: f64) -> Result<(f64, f64), ProjectionError> {
        let e = self.e;
        let (sinlam, mut coslam) = lam.sin_cos();
        let mut sinphi = phi.sin();

        if !self.mode.is_polar() {
            let (sin_x, cos_x) = (2.0 * ssfn(phi, sinphi, e).atan() - FRAC_PI_2).sin_cos();
            let denom = self.cos_x1 * (1.0 + self.sin_x1 * sin_x + self.cos_x1 * cos_x * coslam);
            if denom <= EPS10 {
                return Err(ProjectionError::Singular(lam, phi));
            }
            let a = self.akm1 / denom;
            let x = a * cos_x * sinlam;
            let y = a * (self.cos_x1 * sin_x - self.sin_x1 * cos_x * coslam);
            return Ok((x, y));
        }

        let mut phi = phi;
        if self.mode == StereographicMode::SouthPole {
            phi = -phi;
            coslam = -coslam;
            sinphi = -sinphi;
        }
        // The opposite pole projects to infinity.
        if phi + FRAC_PI_2 < EPS10 {
            return Err(ProjectionError::Singular(lam, phi));
        }
        let rho = self.akm1 * tsfn(phi, sinphi, e);
        Ok((rho * sinlam, -rho * coslam))
    }

    fn inverse_ellipsoid(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let e = self.e;
        let rho = x.hypot(y);
        let (mut x, mut y) = (x, y);

        let (tp, mut phi_l, halfpi, halfe) = if self.mode.is_polar() {
            if self.mode == StereographicMode::NorthPole {
                y = -y;
            }
            let tp = -rho / self.akm1;
            (tp, FRAC_PI_2 - 2.0 * tp.atan(), -FRAC_PI_2, -0.5 * e)
        } else {
            let (sin_c, cos_c) = (2.0 * (rho * self.cos_x1).atan2(self.akm1)).sin_cos();
            let phi_l = if rho == 0.0 {
                (cos_c * self.sin_x1).asin()
            } else {
                aasin(cos_c * self.sin_x1 + y * sin_c * self.cos_x1 / rho)
            };
            let tp = (0.5 * (FRAC_PI_2 + phi_l)).tan();
            x *= sin_c;
            y = rho * self.cos_x1 * cos_c - y * self.sin_x1 * sin_c;
            (tp, phi_l, FRAC_PI_2, 0.5 * e)
        };

        for _ in 0..INVERSE_MAX_ITERATIONS {
            let esinphi = e * phi_l.sin();
            let mut phi =
                2.0 * (tp * ((1.0 + esinphi) / (1.0 - esinphi)).powf(halfe)).atan() - halfpi;
            if (phi_l - phi).abs() < INVERSE_EPSILON {
                if self.mode == StereographicMode::SouthPole {
                    phi = -phi;
                }
                let lam = if x == 0.0 && y == 0.0 { 0.0 } else { x.atan2(y) };
                return Ok((lam, phi));
            }
            phi_l = phi;
        }
        Err(ProjectionError::NoConvergence(INVERSE_MAX_ITERATIONS))
    }

    fn project_sphere(&self, lam: f64, phi: f64) -> Result<(f64, f64), ProjectionError> {
        let (sinphi, cosphi) = phi.sin_cos();
        let (sinlam, mut coslam) = lam.sin_cos();

        if !self.mode.is_polar() {
            let denom = 1.0 + self.sin_x1 * sinphi + self.cos_x1 * cosphi * coslam;
            if denom <= EPS10 {
                return Err(ProjectionError::Singular(lam, phi));
            }
            let a = self.akm1 / denom;
            let x = a * cosphi * sinlam;
            let y = a * (self.cos_x1 * sinphi - self.sin_x1 * cosphi * coslam);
            return Ok((x, y));
        }

        let mut phi = phi;
        if self.mode == StereographicMode::NorthPole {
            coslam = -coslam;
            phi = -phi;
        }
        if (phi - FRAC_PI_2).abs() < 1e-8 {
            return Err(ProjectionError::Singular(lam, phi));
        }
        let rho = self.akm1 * (FRAC_PI_4 + 0.5 * phi).tan();
        Ok((sinlam * rho, coslam * rho))
    }

    fn inverse_sphere(&self, x: f64, y: f64) -> (f64, f64) {
        let rh = x.hypot(y);
        let (sin_c, cos_c) = (2.0 * (rh / self.akm1).atan()).sin_cos();

        if self.mode.is_polar() {
            let y = if self.mode == StereographicMode::NorthPole { -y } else { y };
            let phi = if rh <= EPS10 {
                self.phi0
            } else if self.mode == StereographicMode::SouthPole {
                (-cos_c).asin()
            } else {
                cos_c.asin()
            };
            let lam = if x == 0.0 && y == 0.0 { 0.0 } else { x.atan2(y) };
            return (lam, phi);
        }

        if rh <= EPS10 {
            return (0.0, self.phi0);
        }
        let phi = aasin(cos_c * self.sin_x1 + y * sin_c * self.cos_x1 / rh);
        let c = cos_c - self.sin_x1 * phi.sin();
        let lam = if c != 0.0 || x != 0.0 {
            (x * sin_c * self.cos_x1).atan2(c * rh)
        } else {
            0.0
        };
        (lam, phi)
    }
}

fn aasin(v: f64) -> f64 {
    v.clamp(-1.0, 1.0).asin()
}

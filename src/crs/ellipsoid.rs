//! Reference ellipsoids and the shared series helpers used by the
//! conformal projections.

use crate::error::ProjectionError;
use std::f64::consts::{FRAC_PI_2, PI};

/// Iteration cap for the fixed-point inverse loops.
pub const INVERSE_MAX_ITERATIONS: usize = 8;

/// Convergence threshold (radians) between successive latitude estimates.
pub const INVERSE_EPSILON: f64 = 1e-10;

pub(crate) const EPS10: f64 = 1e-10;

/// A reference ellipsoid, or a sphere when `es == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub name: &'static str,
    /// Semi-major axis in metres.
    pub a: f64,
    /// First eccentricity squared.
    pub es: f64,
}

impl Ellipsoid {
    /// 1/f = 298.257223563
    pub const WGS84: Ellipsoid = Ellipsoid {
        name: "WGS84",
        a: 6_378_137.0,
        es: 0.006_694_379_990_141_317,
    };
    /// 1/f = 298.257222101
    pub const GRS80: Ellipsoid = Ellipsoid {
        name: "GRS80",
        a: 6_378_137.0,
        es: 0.006_694_380_022_900_788,
    };
    /// Authalic sphere with the WGS84 equatorial radius.
    pub const SPHERE: Ellipsoid = Ellipsoid {
        name: "sphere",
        a: 6_378_137.0,
        es: 0.0,
    };

    pub fn from_inverse_flattening(name: &'static str, a: f64, rf: f64) -> Self {
        let f = 1.0 / rf;
        Ellipsoid {
            name,
            a,
            es: f * (2.0 - f),
        }
    }

    pub fn eccentricity(&self) -> f64 {
        self.es.sqrt()
    }

    pub fn is_sphere(&self) -> bool {
        self.es == 0.0
    }
}

/// Wrap a longitude in radians onto `[-pi, pi]`.
pub fn normalize_longitude(mut lon: f64) -> f64 {
    if !lon.is_finite() {
        return lon;
    }
    while lon > PI {
        lon -= 2.0 * PI;
    }
    while lon < -PI {
        lon += 2.0 * PI;
    }
    lon
}

/// Clamp a latitude in radians onto `[-pi/2, pi/2]`.
pub fn normalize_latitude(lat: f64) -> f64 {
    lat.clamp(-FRAC_PI_2, FRAC_PI_2)
}

/// Isometric-latitude helper used by the polar stereographic setup.
pub(crate) fn tsfn(phi: f64, sinphi: f64, e: f64) -> f64 {
    let esinphi = e * sinphi;
    (0.5 * (FRAC_PI_2 - phi)).tan() / ((1.0 - esinphi) / (1.0 + esinphi)).powf(0.5 * e)
}

/// Conformal-latitude helper used by the oblique and equatorial stereographic.
pub(crate) fn ssfn(phit: f64, sinphi: f64, e: f64) -> f64 {
    let esinphi = e * sinphi;
    (0.5 * (FRAC_PI_2 + phit)).tan() * ((1.0 - esinphi) / (1.0 + esinphi)).powf(0.5 * e)
}

/// Coefficients of the meridian distance series for eccentricity squared `es`.
pub(crate) fn enfn(es: f64) -> [f64; 5] {
    const C00: f64 = 1.0;
    const C02: f64 = 0.25;
    const C04: f64 = 0.046875;
    const C06: f64 = 0.01953125;
    const C08: f64 = 0.01068115234375;
    const C22: f64 = 0.75;
    const C44: f64 = 0.46875;
    const C46: f64 = 0.01302083333333333333;
    const C48: f64 = 0.00712076822916666666;
    const C66: f64 = 0.36458333333333333333;
    const C68: f64 = 0.00569661458333333333;
    const C88: f64 = 0.3076171875;

    let mut en = [0.0; 5];
    en[0] = C00 - es * (C02 + es * (C04 + es * (C06 + es * C08)));
    en[1] = es * (C22 - es * (C04 + es * (C06 + es * C08)));
    let mut t = es * es;
    en[2] = t * (C44 - es * (C46 + es * C48));
    t *= es;
    en[3] = t * (C66 - es * C68);
    en[4] = t * es * C88;
    en
}

/// Meridian distance on the unit ellipsoid from the equator to `phi`.
pub(crate) fn mlfn(phi: f64, sinphi: f64, cosphi: f64, en: &[f64; 5]) -> f64 {
    let cphi = cosphi * sinphi;
    let sphi = sinphi * sinphi;
    en[0] * phi - cphi * (en[1] + sphi * (en[2] + sphi * (en[3] + sphi * en[4])))
}

/// Latitude whose meridian distance is `arg`, by bounded Newton refinement.
pub(crate) fn inv_mlfn(arg: f64, es: f64, en: &[f64; 5]) -> Result<f64, ProjectionError> {
    let k = 1.0 / (1.0 - es);
    let mut phi = arg;
    for _ in 0..INVERSE_MAX_ITERATIONS {
        let s = phi.sin();
        let t = 1.0 - es * s * s;
        let delta = (mlfn(phi, s, phi.cos(), en) - arg) * (t * t.sqrt()) * k;
        phi -= delta;
        if delta.abs() < INVERSE_EPSILON {
            return Ok(phi);
        }
    }
    Err(ProjectionError::NoConvergence(INVERSE_MAX_ITERATIONS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wgs84_eccentricity() {
        let e = Ellipsoid::WGS84.eccentricity();
        assert!((e - 0.0818191908426).abs() < 1e-12);
        assert!(Ellipsoid::SPHERE.is_sphere());
        assert!(!Ellipsoid::GRS80.is_sphere());

        let derived = Ellipsoid::from_inverse_flattening("WGS84", 6_378_137.0, 298.257223563);
        assert!((derived.es - Ellipsoid::WGS84.es).abs() < 1e-15);
    }

    #[test]
    fn test_normalize_longitude() {
        assert!((normalize_longitude(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((normalize_longitude(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert_eq!(normalize_longitude(0.5), 0.5);
    }

    #[test]
    fn test_meridian_distance_inverse() {
        let es = Ellipsoid::WGS84.es;
        let en = enfn(es);
        for deg in [-85.0_f64, -45.0, -1.0, 0.0, 10.0, 60.0, 84.0] {
            let phi = deg.to_radians();
            let m = mlfn(phi, phi.sin(), phi.cos(), &en);
            let back = inv_mlfn(m, es, &en).unwrap();
            assert!((back - phi).abs() < 1e-10, "lat {} came back as {}", deg, back.to_degrees());
        }
    }

    #[test]
    fn test_meridian_quadrant() {
        // WGS84 quarter meridian is 10,001,965.729 m
        let en = enfn(Ellipsoid::WGS84.es);
        let quarter = mlfn(FRAC_PI_2, 1.0, 0.0, &en) * Ellipsoid::WGS84.a;
        assert!((quarter - 10_001_965.729).abs() < 1.0, "got {}", quarter);
    }
}

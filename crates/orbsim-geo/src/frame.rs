//! Coordinate frames and topocentric angles.
//!
//! A small fixed set of conversions: WGS84 geodetic to ECEF, Greenwich mean
//! sidereal time for the ECI/ECEF rotation, and the elevation angle of one
//! ECEF point as seen from another.

use core::ops::{Add, Mul, Sub};

use crate::{EARTH_FLATTENING, EARTH_RADIUS_M};

/// A cartesian triple in meters (or unit vectors, per context).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Vec3 {
        Vec3 { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn normalized(self) -> Vec3 {
        let n = self.norm();
        if n == 0.0 {
            Vec3::ZERO
        } else {
            self * (1.0 / n)
        }
    }

    pub fn distance(self, other: Vec3) -> f64 {
        (self - other).norm()
    }

    /// Rotate about the +Z axis by `angle_rad`.
    pub fn rotated_z(self, angle_rad: f64) -> Vec3 {
        let (s, c) = angle_rad.sin_cos();
        Vec3 {
            x: c * self.x - s * self.y,
            y: s * self.x + c * self.y,
            z: self.z,
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// A fixed point on the Earth's surface (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundPoint {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub elevation_m: f64,
}

impl GroundPoint {
    pub fn new(latitude_deg: f64, longitude_deg: f64, elevation_m: f64) -> GroundPoint {
        GroundPoint {
            latitude_deg,
            longitude_deg,
            elevation_m,
        }
    }

    /// Geodetic to ECEF (m).
    pub fn to_ecef(self) -> Vec3 {
        let lat = self.latitude_deg.to_radians();
        let lon = self.longitude_deg.to_radians();
        let e2 = EARTH_FLATTENING * (2.0 - EARTH_FLATTENING);
        let n = EARTH_RADIUS_M / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        Vec3 {
            x: (n + self.elevation_m) * lat.cos() * lon.cos(),
            y: (n + self.elevation_m) * lat.cos() * lon.sin(),
            z: (n * (1.0 - e2) + self.elevation_m) * lat.sin(),
        }
    }
}

/// Greenwich mean sidereal time (rad) at `unix` seconds UTC.
///
/// IAU 1982 polynomial, adequate to a few arcseconds over decades, which is
/// far below the link-budget sensitivity of this simulator.
pub fn gmst_rad(unix: f64) -> f64 {
    // Julian centuries of UT1 (~UTC here) since J2000.0.
    let jd = unix / 86_400.0 + 2_440_587.5;
    let t = (jd - 2_451_545.0) / 36_525.0;
    let gmst_sec = 67_310.548_41
        + (876_600.0 * 3_600.0 + 8_640_184.812_866) * t
        + 0.093_104 * t * t
        - 6.2e-6 * t * t * t;
    let frac = gmst_sec.rem_euclid(86_400.0);
    frac / 86_400.0 * core::f64::consts::TAU
}

/// Elevation (deg) of `target` above the local horizon of `observer`, both
/// in ECEF meters.
///
/// Uses the geocentric-up approximation: the angle between the line of
/// sight and the plane normal to the observer's radius vector.
pub fn elevation_deg(target: Vec3, observer: Vec3) -> f64 {
    let delta = target - observer;
    let d = delta.norm();
    if d == 0.0 {
        return 90.0;
    }
    let up = observer.normalized();
    (delta.dot(up) / d).clamp(-1.0, 1.0).asin().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equator_prime_meridian_ecef() {
        let p = GroundPoint::new(0.0, 0.0, 0.0).to_ecef();
        assert!((p.x - EARTH_RADIUS_M).abs() < 1.0);
        assert!(p.y.abs() < 1.0 && p.z.abs() < 1.0);
    }

    #[test]
    fn pole_uses_polar_radius() {
        let p = GroundPoint::new(90.0, 0.0, 0.0).to_ecef();
        let polar = EARTH_RADIUS_M * (1.0 - EARTH_FLATTENING);
        assert!((p.z - polar).abs() < 1.0, "z = {}", p.z);
    }

    #[test]
    fn gmst_at_j2000_noon() {
        // 2000-01-01 12:00:00 UTC, GMST ~ 280.46 deg.
        let unix = 946_728_000.0;
        let deg = gmst_rad(unix).to_degrees();
        assert!((deg - 280.460_6).abs() < 0.01, "gmst {deg}");
    }

    #[test]
    fn overhead_target_is_at_ninety_degrees() {
        let gs = GroundPoint::new(0.0, 0.0, 0.0).to_ecef();
        let sat = Vec3::new(EARTH_RADIUS_M + 500_000.0, 0.0, 0.0);
        assert!((elevation_deg(sat, gs) - 90.0).abs() < 1e-6);
    }

    #[test]
    fn antipodal_target_is_below_horizon() {
        let gs = GroundPoint::new(0.0, 0.0, 0.0).to_ecef();
        let sat = Vec3::new(-(EARTH_RADIUS_M + 500_000.0), 0.0, 0.0);
        assert!(elevation_deg(sat, gs) < -80.0);
    }
}

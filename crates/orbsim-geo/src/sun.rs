//! Sun position and the illumination predicate.
//!
//! Low-precision solar ephemeris (good to ~0.01 degrees, decades around
//! J2000) and a cylindrical Earth-shadow test. Penumbra is ignored: solar
//! panel output in the partial-shadow seconds is noise at epoch resolution.

use crate::frame::{gmst_rad, Vec3};
use crate::propagate::position_velocity_ecef;
use crate::{GeoError, Tle, EARTH_RADIUS_M};

/// Unit vector from the Earth's center to the Sun, ECEF, at `unix` UTC.
pub fn sun_direction_ecef(unix: f64) -> Vec3 {
    let jd = unix / 86_400.0 + 2_440_587.5;
    let n = jd - 2_451_545.0;

    // Mean longitude and mean anomaly of the Sun (deg).
    let l = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
    let g = (357.528 + 0.985_600_3 * n).rem_euclid(360.0).to_radians();
    // Ecliptic longitude with the two largest equation-of-center terms.
    let lambda = (l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
    // Obliquity of the ecliptic.
    let eps = (23.439 - 4.0e-7 * n).to_radians();

    let eci = Vec3 {
        x: lambda.cos(),
        y: eps.cos() * lambda.sin(),
        z: eps.sin() * lambda.sin(),
    };
    eci.rotated_z(-gmst_rad(unix))
}

/// Whether the satellite is illuminated by the Sun at `unix` UTC.
pub fn in_sunlight(tle: &Tle, unix: f64) -> Result<bool, GeoError> {
    let (pos, _) = position_velocity_ecef(tle, unix)?;
    Ok(point_in_sunlight(pos, unix))
}

/// Cylindrical shadow test for an arbitrary ECEF point.
pub fn point_in_sunlight(pos: Vec3, unix: f64) -> bool {
    let sun = sun_direction_ecef(unix);
    let along = pos.dot(sun);
    if along >= 0.0 {
        // Day side of the terminator plane.
        return true;
    }
    // Night side: illuminated only outside the shadow cylinder.
    let perp = pos - sun * along;
    perp.norm() > EARTH_RADIUS_M
}

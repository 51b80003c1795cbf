//! Kepler propagation with secular J2 drift.
//!
//! Mean elements from the TLE are advanced analytically: the mean anomaly by
//! the mean motion, RAAN and the argument of perigee by the standard J2
//! secular rates. Kepler's equation is solved by Newton iteration, the
//! perifocal state rotated into ECI, and the ECI state rotated by GMST into
//! ECEF so that ground stations stay fixed.

use crate::frame::{gmst_rad, GroundPoint, Vec3};
use crate::{GeoError, Tle, EARTH_RADIUS_M, GM_EARTH, J2};

const KEPLER_ITERATIONS: usize = 12;

/// Solve Kepler's equation M = E - e sin E for the eccentric anomaly.
fn eccentric_anomaly(mean_anomaly: f64, ecc: f64) -> f64 {
    let m = mean_anomaly.rem_euclid(core::f64::consts::TAU);
    let mut e = if ecc < 0.8 { m } else { core::f64::consts::PI };
    for _ in 0..KEPLER_ITERATIONS {
        let f = e - ecc * e.sin() - m;
        let fp = 1.0 - ecc * e.cos();
        e -= f / fp;
    }
    e
}

/// Satellite position and velocity in ECEF at `unix` seconds UTC.
pub fn position_velocity_ecef(tle: &Tle, unix: f64) -> Result<(Vec3, Vec3), GeoError> {
    if tle.eccentricity >= 1.0 {
        return Err(GeoError::Domain(format!(
            "eccentricity {} is not a closed orbit",
            tle.eccentricity
        )));
    }
    let n = tle.mean_motion_rad_s();
    let a = tle.semi_major_axis_m();
    if a <= EARTH_RADIUS_M {
        return Err(GeoError::Domain(format!(
            "semi-major axis {a} m is inside the Earth"
        )));
    }
    let ecc = tle.eccentricity;
    let dt = unix - tle.epoch_unix;

    // Secular J2 rates on RAAN and argument of perigee.
    let p = a * (1.0 - ecc * ecc);
    let j2_factor = 1.5 * n * J2 * (EARTH_RADIUS_M / p).powi(2);
    let cos_i = tle.inclination_rad.cos();
    let raan = tle.raan_rad - j2_factor * cos_i * dt;
    let argp = tle.arg_perigee_rad + j2_factor * (2.0 - 2.5 * tle.inclination_rad.sin().powi(2)) * dt;

    let mean_anomaly = tle.mean_anomaly_rad + n * dt;
    let ea = eccentric_anomaly(mean_anomaly, ecc);

    // Perifocal position and velocity.
    let (sin_ea, cos_ea) = ea.sin_cos();
    let r = a * (1.0 - ecc * cos_ea);
    let sqrt_one_minus_e2 = (1.0 - ecc * ecc).sqrt();
    let x_pf = a * (cos_ea - ecc);
    let y_pf = a * sqrt_one_minus_e2 * sin_ea;
    let v_scale = (GM_EARTH * a).sqrt() / r;
    let vx_pf = -v_scale * sin_ea;
    let vy_pf = v_scale * sqrt_one_minus_e2 * cos_ea;

    // Perifocal -> ECI: R3(-raan) R1(-incl) R3(-argp).
    let (sin_o, cos_o) = raan.sin_cos();
    let (sin_i, cos_i2) = tle.inclination_rad.sin_cos();
    let (sin_w, cos_w) = argp.sin_cos();
    let rot = |px: f64, py: f64| -> Vec3 {
        Vec3 {
            x: (cos_o * cos_w - sin_o * sin_w * cos_i2) * px
                + (-cos_o * sin_w - sin_o * cos_w * cos_i2) * py,
            y: (sin_o * cos_w + cos_o * sin_w * cos_i2) * px
                + (-sin_o * sin_w + cos_o * cos_w * cos_i2) * py,
            z: (sin_w * sin_i) * px + (cos_w * sin_i) * py,
        }
    };
    let r_eci = rot(x_pf, y_pf);
    let v_eci = rot(vx_pf, vy_pf);

    // ECI -> ECEF by the Greenwich angle. The velocity keeps only the frame
    // rotation of the position handled numerically by callers that need
    // range rates; for link purposes the inertial magnitude is what matters.
    let theta = gmst_rad(unix);
    Ok((r_eci.rotated_z(-theta), v_eci.rotated_z(-theta)))
}

/// Bulk propagation: ECEF positions on the grid `start..=end` every `step`
/// seconds. One call amortizes the per-epoch setup for a whole run.
pub fn positions_ecef(
    tle: &Tle,
    start_unix: f64,
    end_unix: f64,
    step_s: f64,
) -> Result<Vec<(f64, Vec3)>, GeoError> {
    if step_s <= 0.0 {
        return Err(GeoError::Domain(format!("non-positive step {step_s}")));
    }
    let count = ((end_unix - start_unix) / step_s).floor() as usize + 1;
    let mut out = Vec::with_capacity(count.max(1));
    let mut t = start_unix;
    while t <= end_unix + 1e-9 {
        let (pos, _) = position_velocity_ecef(tle, t)?;
        out.push((t, pos));
        t += step_s;
    }
    Ok(out)
}

/// Distance (m) and range rate (m/s, positive receding) between a satellite
/// and a ground point at `unix`.
///
/// The range rate is the centered finite difference of the slant range, so
/// it includes Earth-rotation effects without a full ECEF velocity model.
pub fn relative_motion(
    tle: &Tle,
    ground: GroundPoint,
    unix: f64,
) -> Result<(f64, f64), GeoError> {
    let gp = ground.to_ecef();
    let (pos, _) = position_velocity_ecef(tle, unix)?;
    let d = pos.distance(gp);
    let (before, _) = position_velocity_ecef(tle, unix - 0.5)?;
    let (after, _) = position_velocity_ecef(tle, unix + 0.5)?;
    let rate = after.distance(gp) - before.distance(gp);
    Ok((d, rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_tle() -> Tle {
        Tle::parse(
            "1 50985U 22002B   22290.71715197  .00032099  00000+0  13424-2 0  9994",
            "2 50985  97.4784 357.5505 0011839 353.6613   6.4472 15.23462773 42039",
        )
        .unwrap()
    }

    #[test]
    fn kepler_solver_satisfies_equation() {
        for &(m, e) in &[(0.3, 0.001), (2.5, 0.1), (5.9, 0.7)] {
            let ea = eccentric_anomaly(m, e);
            assert!((ea - e * ea.sin() - m).abs() < 1e-10);
        }
    }

    #[test]
    fn radius_stays_near_semi_major_axis() {
        let tle = reference_tle();
        let a = tle.semi_major_axis_m();
        for k in 0..20 {
            let t = tle.epoch_unix + k as f64 * 300.0;
            let (pos, _) = position_velocity_ecef(&tle, t).unwrap();
            let r = pos.norm();
            // Near-circular orbit: radius within a few per mille of a.
            assert!((r - a).abs() / a < 0.01, "r={r} a={a}");
        }
    }

    #[test]
    fn speed_matches_circular_orbit() {
        let tle = reference_tle();
        let a = tle.semi_major_axis_m();
        let v_circ = (GM_EARTH / a).sqrt();
        let (_, vel) = position_velocity_ecef(&tle, tle.epoch_unix).unwrap();
        let v = vel.norm();
        assert!((v - v_circ).abs() / v_circ < 0.02, "v={v} v_circ={v_circ}");
    }

    #[test]
    fn bulk_matches_stepwise_within_tolerance() {
        let tle = reference_tle();
        let t0 = tle.epoch_unix;
        let grid = positions_ecef(&tle, t0, t0 + 600.0, 60.0).unwrap();
        assert_eq!(grid.len(), 11);
        for (t, pos) in grid {
            let (single, _) = position_velocity_ecef(&tle, t).unwrap();
            assert!(pos.distance(single) < 1e-6);
        }
    }

    #[test]
    fn range_rate_changes_sign_across_closest_approach() {
        let tle = reference_tle();
        let ground = GroundPoint::new(0.0, 0.0, 0.0);
        // Scan one orbit: the slant range must both open and close.
        let mut saw_closing = false;
        let mut saw_opening = false;
        for k in 0..95 {
            let t = tle.epoch_unix + k as f64 * 60.0;
            let (_, rate) = relative_motion(&tle, ground, t).unwrap();
            if rate < 0.0 {
                saw_closing = true;
            } else if rate > 0.0 {
                saw_opening = true;
            }
        }
        assert!(saw_closing && saw_opening);
    }

    #[test]
    fn hyperbolic_elements_are_rejected() {
        let mut tle = reference_tle();
        tle.eccentricity = 1.5;
        assert!(matches!(
            position_velocity_ecef(&tle, tle.epoch_unix),
            Err(GeoError::Domain(_))
        ));
    }
}

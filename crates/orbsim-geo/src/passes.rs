//! Pass window computation.
//!
//! Finds the contiguous intervals during which a satellite sits above a
//! minimum elevation as seen from a ground point. Coarse scan at a fixed
//! stride to bracket threshold crossings, then bisection to refine each
//! crossing. Endpoints at the window boundary are clipped.

use crate::frame::{elevation_deg, GroundPoint, Vec3};
use crate::propagate::position_velocity_ecef;
use crate::{GeoError, Tle};

/// Coarse scan stride (s). Shorter than any usable LEO pass, so no pass is
/// skipped over.
const SCAN_STEP_S: f64 = 30.0;
/// Bisection refinement tolerance (s).
const REFINE_TOL_S: f64 = 0.05;

/// One visibility interval, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassWindow {
    pub rise_unix: f64,
    pub set_unix: f64,
}

impl PassWindow {
    /// Whether `unix` lies inside the window (inclusive).
    pub fn contains(&self, unix: f64) -> bool {
        self.rise_unix <= unix && unix <= self.set_unix
    }
}

fn elevation_at(tle: &Tle, ground: Vec3, unix: f64) -> Result<f64, GeoError> {
    let (pos, _) = position_velocity_ecef(tle, unix)?;
    Ok(elevation_deg(pos, ground))
}

/// Bisect a threshold crossing bracketed by [lo, hi].
fn refine_crossing(
    tle: &Tle,
    ground: Vec3,
    min_elevation_deg: f64,
    mut lo: f64,
    mut hi: f64,
    rising: bool,
) -> Result<f64, GeoError> {
    while hi - lo > REFINE_TOL_S {
        let mid = 0.5 * (lo + hi);
        let above = elevation_at(tle, ground, mid)? >= min_elevation_deg;
        if above == rising {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Ok(0.5 * (lo + hi))
}

/// All pass windows of `tle` over `ground` within `[start_unix, end_unix]`
/// above `min_elevation_deg`.
pub fn passes(
    tle: &Tle,
    ground: GroundPoint,
    start_unix: f64,
    end_unix: f64,
    min_elevation_deg: f64,
) -> Result<Vec<PassWindow>, GeoError> {
    if end_unix <= start_unix {
        return Ok(Vec::new());
    }
    let gp = ground.to_ecef();
    let mut windows = Vec::new();

    let mut t = start_unix;
    let mut above = elevation_at(tle, gp, t)? >= min_elevation_deg;
    let mut rise = if above { Some(start_unix) } else { None };

    while t < end_unix {
        let next = (t + SCAN_STEP_S).min(end_unix);
        let next_above = elevation_at(tle, gp, next)? >= min_elevation_deg;
        if next_above != above {
            let crossing = refine_crossing(tle, gp, min_elevation_deg, t, next, next_above)?;
            if next_above {
                rise = Some(crossing);
            } else if let Some(r) = rise.take() {
                windows.push(PassWindow {
                    rise_unix: r,
                    set_unix: crossing,
                });
            }
            above = next_above;
        }
        t = next;
    }
    if let Some(r) = rise {
        // Still above at the window boundary: clip.
        windows.push(PassWindow {
            rise_unix: r,
            set_unix: end_unix,
        });
    }
    Ok(windows)
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
    fn empty_window_has_no_passes() {
        let tle = reference_tle();
        let gs = GroundPoint::new(0.0, 0.0, 0.0);
        let t0 = tle.epoch_unix;
        assert!(passes(&tle, gs, t0, t0, 0.0).unwrap().is_empty());
    }

    #[test]
    fn windows_are_ordered_clipped_and_above_threshold() {
        let tle = reference_tle();
        let gs = GroundPoint::new(0.0, 0.0, 0.0);
        let t0 = tle.epoch_unix;
        let t1 = t0 + 86_400.0;
        let found = passes(&tle, gs, t0, t1, 5.0).unwrap();
        // A 500 km polar orbit must cross an equatorial station within a day.
        assert!(!found.is_empty(), "no pass over 24h");
        let mut prev_set = t0;
        for w in &found {
            assert!(w.rise_unix >= prev_set);
            assert!(w.set_unix > w.rise_unix);
            assert!(w.rise_unix >= t0 && w.set_unix <= t1);
            // Midpoint must be above threshold.
            let mid = 0.5 * (w.rise_unix + w.set_unix);
            let (pos, _) = position_velocity_ecef(&tle, mid).unwrap();
            assert!(elevation_deg(pos, gs.to_ecef()) >= 5.0);
            prev_set = w.set_unix;
        }
        // LEO pass durations are minutes, not hours.
        for w in &found {
            assert!(w.set_unix - w.rise_unix < 1_200.0);
        }
    }

    #[test]
    fn identical_queries_return_identical_windows() {
        let tle = reference_tle();
        let gs = GroundPoint::new(12.3, 45.6, 100.0);
        let t0 = tle.epoch_unix;
        let a = passes(&tle, gs, t0, t0 + 43_200.0, 10.0).unwrap();
        let b = passes(&tle, gs, t0, t0 + 43_200.0, 10.0).unwrap();
        assert_eq!(a, b);
    }
}

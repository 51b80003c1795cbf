//! Two-line element set parsing.
//!
//! Fixed-column extraction of the Kepler elements the propagator consumes.
//! Checksums are not verified: configs frequently carry hand-edited TLEs and
//! a bad checksum does not change the elements.

use chrono::{TimeZone, Utc};

use crate::GeoError;

/// A parsed two-line element set.
#[derive(Debug, Clone, PartialEq)]
pub struct Tle {
    /// NORAD catalog number.
    pub catalog_number: u32,
    /// Element epoch as UTC unix seconds.
    pub epoch_unix: f64,
    /// Inclination (rad).
    pub inclination_rad: f64,
    /// Right ascension of the ascending node at epoch (rad).
    pub raan_rad: f64,
    /// Eccentricity (dimensionless).
    pub eccentricity: f64,
    /// Argument of perigee at epoch (rad).
    pub arg_perigee_rad: f64,
    /// Mean anomaly at epoch (rad).
    pub mean_anomaly_rad: f64,
    /// Mean motion (rev/day).
    pub mean_motion_rev_day: f64,
}

fn field<'a>(line: &'a str, which: u8, range: core::ops::Range<usize>) -> Result<&'a str, GeoError> {
    line.get(range.clone())
        .ok_or_else(|| GeoError::TleParse {
            line: which,
            reason: format!("line shorter than column {}", range.end),
        })
        .map(str::trim)
}

fn parse_f64(line: &str, which: u8, range: core::ops::Range<usize>) -> Result<f64, GeoError> {
    let raw = field(line, which, range)?;
    raw.parse::<f64>().map_err(|_| GeoError::TleParse {
        line: which,
        reason: format!("expected a number, found {raw:?}"),
    })
}

impl Tle {
    /// Parse a TLE from its two lines.
    pub fn parse(line1: &str, line2: &str) -> Result<Tle, GeoError> {
        if !line1.starts_with("1 ") {
            return Err(GeoError::TleParse {
                line: 1,
                reason: "line 1 must start with \"1 \"".into(),
            });
        }
        if !line2.starts_with("2 ") {
            return Err(GeoError::TleParse {
                line: 2,
                reason: "line 2 must start with \"2 \"".into(),
            });
        }

        let catalog_number = field(line2, 2, 2..7)?
            .parse::<u32>()
            .map_err(|_| GeoError::TleParse {
                line: 2,
                reason: "bad catalog number".into(),
            })?;

        // Epoch: two-digit year (57-99 => 1900s, else 2000s) and fractional
        // day of year, columns 19-32 of line 1.
        let yy = field(line1, 1, 18..20)?
            .parse::<i32>()
            .map_err(|_| GeoError::TleParse {
                line: 1,
                reason: "bad epoch year".into(),
            })?;
        let year = if yy >= 57 { 1900 + yy } else { 2000 + yy };
        let doy = parse_f64(line1, 1, 20..32)?;
        if !(1.0..367.0).contains(&doy) {
            return Err(GeoError::TleParse {
                line: 1,
                reason: format!("epoch day-of-year {doy} out of range"),
            });
        }
        let jan1 = Utc
            .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| GeoError::TleParse {
                line: 1,
                reason: format!("bad epoch year {year}"),
            })?;
        let epoch_unix = jan1.timestamp() as f64 + (doy - 1.0) * 86_400.0;

        let inclination_deg = parse_f64(line2, 2, 8..16)?;
        let raan_deg = parse_f64(line2, 2, 17..25)?;
        // Eccentricity has an implied leading decimal point.
        let ecc_raw = field(line2, 2, 26..33)?;
        let eccentricity = format!("0.{ecc_raw}")
            .parse::<f64>()
            .map_err(|_| GeoError::TleParse {
                line: 2,
                reason: format!("bad eccentricity {ecc_raw:?}"),
            })?;
        let arg_perigee_deg = parse_f64(line2, 2, 34..42)?;
        let mean_anomaly_deg = parse_f64(line2, 2, 43..51)?;
        let mean_motion_rev_day = parse_f64(line2, 2, 52..63)?;
        if mean_motion_rev_day <= 0.0 {
            return Err(GeoError::TleParse {
                line: 2,
                reason: "mean motion must be positive".into(),
            });
        }

        Ok(Tle {
            catalog_number,
            epoch_unix,
            inclination_rad: inclination_deg.to_radians(),
            raan_rad: raan_deg.to_radians(),
            eccentricity,
            arg_perigee_rad: arg_perigee_deg.to_radians(),
            mean_anomaly_rad: mean_anomaly_deg.to_radians(),
            mean_motion_rev_day,
        })
    }

    /// Mean motion in rad/s.
    pub fn mean_motion_rad_s(&self) -> f64 {
        self.mean_motion_rev_day * core::f64::consts::TAU / 86_400.0
    }

    /// Semi-major axis (m) derived from the mean motion.
    pub fn semi_major_axis_m(&self) -> f64 {
        (crate::GM_EARTH / self.mean_motion_rad_s().powi(2)).cbrt()
    }

    /// Orbital period (s).
    pub fn period_s(&self) -> f64 {
        core::f64::consts::TAU / self.mean_motion_rad_s()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE1: &str = "1 50985U 22002B   22290.71715197  .00032099  00000+0  13424-2 0  9994";
    const LINE2: &str = "2 50985  97.4784 357.5505 0011839 353.6613   6.4472 15.23462773 42039";

    #[test]
    fn parses_reference_tle() {
        let tle = Tle::parse(LINE1, LINE2).unwrap();
        assert_eq!(tle.catalog_number, 50985);
        assert!((tle.inclination_rad.to_degrees() - 97.4784).abs() < 1e-6);
        assert!((tle.eccentricity - 0.0011839).abs() < 1e-9);
        assert!((tle.mean_motion_rev_day - 15.23462773).abs() < 1e-9);
        // ~15.23 rev/day is a ~500 km LEO.
        let alt_km = (tle.semi_major_axis_m() - crate::EARTH_RADIUS_M) / 1000.0;
        assert!(alt_km > 400.0 && alt_km < 600.0, "altitude {alt_km} km");
    }

    #[test]
    fn epoch_lands_in_october_2022() {
        let tle = Tle::parse(LINE1, LINE2).unwrap();
        // Day 290 of 2022 is Oct 17.
        let oct_17 = Utc.with_ymd_and_hms(2022, 10, 17, 0, 0, 0).unwrap();
        let oct_18 = Utc.with_ymd_and_hms(2022, 10, 18, 0, 0, 0).unwrap();
        assert!(tle.epoch_unix > oct_17.timestamp() as f64);
        assert!(tle.epoch_unix < oct_18.timestamp() as f64);
    }

    #[test]
    fn rejects_swapped_lines() {
        let err = Tle::parse(LINE2, LINE1).unwrap_err();
        assert!(matches!(err, GeoError::TleParse { line: 1, .. }));
    }

    #[test]
    fn rejects_truncated_line() {
        let err = Tle::parse(LINE1, "2 50985  97.47").unwrap_err();
        assert!(matches!(err, GeoError::TleParse { line: 2, .. }));
    }
}

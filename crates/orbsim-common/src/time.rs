//! Simulated time.
//!
//! [`SimTime`] is an integer microsecond offset from the scenario start, so
//! epoch arithmetic is exact and ordering is total. [`SimClock`] anchors the
//! offset to a UTC wall-clock window and carries the epoch length.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp format used throughout scenario files and log records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Simulated time in microseconds since scenario start.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub fn from_micros(us: u64) -> SimTime {
        SimTime(us)
    }

    pub fn from_millis(ms: u64) -> SimTime {
        SimTime(ms * 1_000)
    }

    pub fn from_secs(s: f64) -> SimTime {
        SimTime((s * 1_000_000.0).round() as u64)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Saturating difference in seconds.
    pub fn seconds_since(&self, earlier: SimTime) -> f64 {
        (*self - earlier).as_secs_f64()
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// Failure to interpret a scenario timestamp or window.
#[derive(Debug, Error)]
pub enum TimeParseError {
    #[error("timestamp {0:?} does not match \"{TIMESTAMP_FORMAT}\"")]
    BadTimestamp(String),

    #[error("end time {end} is not after start time {start}")]
    EmptyWindow { start: String, end: String },

    #[error("epoch delta {0} must be positive")]
    BadDelta(f64),
}

/// Parse a scenario timestamp (`YYYY-MM-DD HH:MM:SS`, UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TimeParseError> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| TimeParseError::BadTimestamp(raw.to_string()))
}

/// The scenario clock: UTC anchor, window length, and epoch delta.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    start: DateTime<Utc>,
    /// Offset of the scenario end from the start.
    end: SimTime,
    delta: SimTime,
}

impl SimClock {
    pub fn new(start: &str, end: &str, delta_seconds: f64) -> Result<SimClock, TimeParseError> {
        if delta_seconds <= 0.0 {
            return Err(TimeParseError::BadDelta(delta_seconds));
        }
        let start_utc = parse_timestamp(start)?;
        let end_utc = parse_timestamp(end)?;
        let span = (end_utc - start_utc).num_microseconds().unwrap_or(-1);
        if span <= 0 {
            return Err(TimeParseError::EmptyWindow {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(SimClock {
            start: start_utc,
            end: SimTime::from_micros(span as u64),
            delta: SimTime::from_secs(delta_seconds),
        })
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start
    }

    /// Scenario end as an offset from the start.
    pub fn end(&self) -> SimTime {
        self.end
    }

    pub fn delta(&self) -> SimTime {
        self.delta
    }

    pub fn delta_secs(&self) -> f64 {
        self.delta.as_secs_f64()
    }

    /// Number of epochs the manager will realize:
    /// `floor((t_end - t_start) / delta) + 1`.
    pub fn epoch_count(&self) -> u64 {
        self.end.as_micros() / self.delta.as_micros() + 1
    }

    /// UTC instant of a simulated offset.
    pub fn utc_of(&self, t: SimTime) -> DateTime<Utc> {
        self.start + chrono::Duration::microseconds(t.as_micros() as i64)
    }

    /// Unix seconds (UTC) of a simulated offset, for the geometry oracle.
    pub fn unix_of(&self, t: SimTime) -> f64 {
        self.start.timestamp() as f64
            + self.start.timestamp_subsec_micros() as f64 / 1e6
            + t.as_secs_f64()
    }

    /// Render a simulated offset as a scenario timestamp string.
    pub fn format_of(&self, t: SimTime) -> String {
        self.utc_of(t).format(TIMESTAMP_FORMAT).to_string()
    }

    /// Convert an absolute scenario timestamp into an offset. Times before
    /// the scenario start clamp to zero.
    pub fn offset_of(&self, raw: &str) -> Result<SimTime, TimeParseError> {
        let at = parse_timestamp(raw)?;
        let micros = (at - self.start).num_microseconds().unwrap_or(0);
        Ok(SimTime::from_micros(micros.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_time_arithmetic() {
        let a = SimTime::from_secs(1.5);
        let b = SimTime::from_millis(500);
        assert_eq!((a + b).as_micros(), 2_000_000);
        assert_eq!((b - a).as_micros(), 0); // saturating
        assert!((a.seconds_since(b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn clock_epoch_count_matches_floor_plus_one() {
        let clock = SimClock::new("2022-10-17 12:00:00", "2022-10-17 12:11:00", 1.0).unwrap();
        assert_eq!(clock.epoch_count(), 661);

        // Non-divisible window: floor semantics.
        let clock = SimClock::new("2022-10-17 12:00:00", "2022-10-17 12:00:10", 3.0).unwrap();
        assert_eq!(clock.epoch_count(), 4); // 0, 3, 6, 9
    }

    #[test]
    fn clock_round_trips_timestamps() {
        let clock = SimClock::new("2022-10-17 12:00:00", "2022-10-17 13:00:00", 5.0).unwrap();
        let t = SimTime::from_secs(125.0);
        assert_eq!(clock.format_of(t), "2022-10-17 12:02:05");
        assert_eq!(clock.offset_of("2022-10-17 12:02:05").unwrap(), t);
    }

    #[test]
    fn rejects_bad_windows() {
        assert!(matches!(
            SimClock::new("2022-10-17 12:00:00", "2022-10-17 11:00:00", 1.0),
            Err(TimeParseError::EmptyWindow { .. })
        ));
        assert!(matches!(
            SimClock::new("2022-10-17 12:00:00", "2022-10-17 13:00:00", 0.0),
            Err(TimeParseError::BadDelta(_))
        ));
        assert!(matches!(
            SimClock::new("17/10/2022", "2022-10-17 13:00:00", 1.0),
            Err(TimeParseError::BadTimestamp(_))
        ));
    }
}

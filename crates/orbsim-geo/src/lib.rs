//! # orbsim-geo
//!
//! Geometry oracle for the orbsim simulator.
//!
//! Pure, deterministic functions over two-line element sets and ground
//! points: satellite position/velocity in an Earth-centered frame, the
//! sun-illumination predicate, pass windows above a minimum elevation, and
//! relative motion between a satellite and a ground point. Identical inputs
//! always produce identical outputs; nothing here holds mutable state.
//!
//! All positions are expressed in the Earth-centered Earth-fixed (ECEF)
//! frame in meters, which keeps ground stations static and makes
//! elevation/range math frame-consistent for the link layer.

pub mod frame;
pub mod passes;
pub mod propagate;
pub mod sun;
pub mod tle;

pub use frame::{elevation_deg, GroundPoint, Vec3};
pub use passes::{passes, PassWindow};
pub use propagate::{position_velocity_ecef, positions_ecef, relative_motion};
pub use sun::in_sunlight;
pub use tle::Tle;

use thiserror::Error;

/// Earth gravitational parameter (m^3/s^2).
pub const GM_EARTH: f64 = 3.986_004_418e14;
/// WGS84 equatorial radius (m).
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const EARTH_FLATTENING: f64 = 1.0 / 298.257_223_563;
/// Earth rotation rate (rad/s).
pub const OMEGA_EARTH: f64 = 7.292_115e-5;
/// J2 zonal harmonic coefficient.
pub const J2: f64 = 1.082_626_68e-3;
/// Speed of light (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Errors raised by the geometry oracle.
///
/// These are never fatal to a running simulation: the owning model logs the
/// failure and skips the epoch for that satellite.
#[derive(Debug, Error)]
pub enum GeoError {
    /// A TLE line failed to parse.
    #[error("malformed TLE line {line}: {reason}")]
    TleParse {
        /// Which line (1 or 2) was malformed.
        line: u8,
        /// Human-readable parse failure.
        reason: String,
    },

    /// Orbital elements outside the propagator's domain.
    #[error("propagation domain error: {0}")]
    Domain(String),
}

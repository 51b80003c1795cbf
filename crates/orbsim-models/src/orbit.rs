//! Orbital models (tag `ORBITAL`).
//!
//! Three interchangeable implementations of the same operation surface:
//! - [`ModelOrbit`] propagates from the node's TLE on every query.
//! - [`ModelOrbitOneFullUpdate`] bulk-propagates the whole run on first
//!   advance and answers from the grid, falling back to direct propagation
//!   off-grid. Positions agree with `ModelOrbit` to numerical tolerance.
//! - [`ModelFixedOrbit`] pins the node to a configured position with a
//!   forced illumination flag, for deterministic protocol tests.
//!
//! Operations: `get_position`, `get_velocity`, `in_sunlight`,
//! `get_relative_motion { target }`, `get_passes { target, min_elevation }`.

use serde::Deserialize;

use orbsim_common::{
    GeoCatalog, InvocationError, Kwargs, Model, ModelContext, ModelTag, NodeId, PassInterval,
    PositionSource, SimClock, SimTime, Value,
};
use orbsim_geo::frame::Vec3;
use orbsim_geo::{
    elevation_deg, passes as oracle_passes, position_velocity_ecef, relative_motion, GroundPoint,
    Tle,
};

use crate::ModelConfigError;

/// Pass windows between two catalog nodes over a simulated window.
///
/// The satellite side must carry a TLE or fixed position; the other side a
/// ground point (or fixed position). Fixed-position pairs degenerate to a
/// single whole-window interval when the static elevation clears the
/// threshold.
pub fn compute_passes(
    catalog: &GeoCatalog,
    a: NodeId,
    b: NodeId,
    start: SimTime,
    end: SimTime,
    min_elevation_deg: f64,
) -> Result<Vec<PassInterval>, orbsim_geo::GeoError> {
    let entry_a = catalog
        .entry(a)
        .ok_or_else(|| orbsim_geo::GeoError::Domain(format!("node {a} not in catalog")))?;
    let entry_b = catalog
        .entry(b)
        .ok_or_else(|| orbsim_geo::GeoError::Domain(format!("node {b} not in catalog")))?;
    let clock = catalog.clock();

    // Identify the orbiting and ground sides.
    let (sat_src, ground_src) = match (&entry_a.source, &entry_b.source) {
        (PositionSource::Ground(_), _) => (&entry_b.source, &entry_a.source),
        _ => (&entry_a.source, &entry_b.source),
    };

    match (sat_src, ground_src) {
        (PositionSource::Tle(tle), PositionSource::Ground(gp)) => {
            let windows = oracle_passes(
                tle,
                *gp,
                clock.unix_of(start),
                clock.unix_of(end),
                min_elevation_deg,
            )?;
            let base = clock.unix_of(SimTime::ZERO);
            Ok(windows
                .into_iter()
                .map(|w| PassInterval {
                    start: SimTime::from_secs(w.rise_unix - base),
                    end: SimTime::from_secs(w.set_unix - base),
                })
                .collect())
        }
        // A fixed satellite never moves: one whole-window pass or nothing.
        (PositionSource::Fixed { ecef, .. }, PositionSource::Ground(gp)) => {
            if elevation_deg(*ecef, gp.to_ecef()) >= min_elevation_deg {
                Ok(vec![PassInterval { start, end }])
            } else {
                Ok(Vec::new())
            }
        }
        (PositionSource::Fixed { ecef: sat, .. }, PositionSource::Fixed { ecef: other, .. }) => {
            if elevation_deg(*sat, *other) >= min_elevation_deg {
                Ok(vec![PassInterval { start, end }])
            } else {
                Ok(Vec::new())
            }
        }
        _ => Ok(Vec::new()),
    }
}

/// The shared operation dispatch for every orbital implementation.
fn orbital_invoke(
    model: &'static str,
    tle: Option<&Tle>,
    fixed: Option<(Vec3, bool)>,
    clock: &SimClock,
    op: &str,
    args: &mut Kwargs,
    ctx: &mut ModelContext<'_>,
) -> Result<Value, InvocationError> {
    let at = args.opt_time(op_key(op), "at_time")?.unwrap_or(ctx.now());
    match op {
        "get_position" => {
            if let Some((ecef, _)) = fixed {
                return Ok(Value::Position([ecef.x, ecef.y, ecef.z]));
            }
            let tle = tle_or_fail(model, tle)?;
            let (pos, _) = position_velocity_ecef(tle, clock.unix_of(at))
                .map_err(|e| InvocationError::precondition(e.to_string()))?;
            Ok(Value::Position([pos.x, pos.y, pos.z]))
        }
        "get_velocity" => {
            if fixed.is_some() {
                return Ok(Value::Position([0.0, 0.0, 0.0]));
            }
            let tle = tle_or_fail(model, tle)?;
            let (_, vel) = position_velocity_ecef(tle, clock.unix_of(at))
                .map_err(|e| InvocationError::precondition(e.to_string()))?;
            Ok(Value::Position([vel.x, vel.y, vel.z]))
        }
        "in_sunlight" => {
            if let Some((_, sunlit)) = fixed {
                return Ok(Value::Bool(sunlit));
            }
            let tle = tle_or_fail(model, tle)?;
            let lit = orbsim_geo::in_sunlight(tle, clock.unix_of(at))
                .map_err(|e| InvocationError::precondition(e.to_string()))?;
            Ok(Value::Bool(lit))
        }
        "get_relative_motion" => {
            let target = NodeId(args.require_i64("get_relative_motion", "target")? as u32);
            let world = ctx.world().clone();
            let target_entry = world.catalog.entry(target).ok_or_else(|| {
                InvocationError::precondition(format!("node {target} not in catalog"))
            })?;
            match (&target_entry.source, tle) {
                (PositionSource::Ground(gp), Some(tle)) => {
                    let (distance, rate) = relative_motion(tle, *gp, clock.unix_of(at))
                        .map_err(|e| InvocationError::precondition(e.to_string()))?;
                    Ok(Value::Floats(vec![distance, rate]))
                }
                _ => {
                    // Degenerate cases (fixed orbit or non-ground target):
                    // static distance, zero rate.
                    let own = match fixed {
                        Some((ecef, _)) => ecef,
                        None => {
                            let tle = tle_or_fail(model, tle)?;
                            position_velocity_ecef(tle, clock.unix_of(at))
                                .map_err(|e| InvocationError::precondition(e.to_string()))?
                                .0
                        }
                    };
                    let other = world
                        .catalog
                        .position_of(target, at)
                        .map_err(|e| InvocationError::precondition(e.to_string()))?;
                    Ok(Value::Floats(vec![own.distance(other), 0.0]))
                }
            }
        }
        "get_passes" => {
            let target = NodeId(args.require_i64("get_passes", "target")? as u32);
            let min_elevation = args.opt_f64("get_passes", "min_elevation")?.unwrap_or(0.0);
            let start = args.opt_time("get_passes", "start")?.unwrap_or(SimTime::ZERO);
            let end = args
                .opt_time("get_passes", "end")?
                .unwrap_or_else(|| clock.end());
            let world = ctx.world().clone();
            let windows =
                compute_passes(&world.catalog, ctx.node_id(), target, start, end, min_elevation)
                    .map_err(|e| InvocationError::precondition(e.to_string()))?;
            Ok(Value::Windows(
                windows.into_iter().map(|w| (w.start, w.end)).collect(),
            ))
        }
        other => Err(InvocationError::UnknownOperation {
            model,
            op: other.to_string(),
        }),
    }
}

fn op_key(op: &str) -> &'static str {
    match op {
        "get_position" => "get_position",
        "get_velocity" => "get_velocity",
        "in_sunlight" => "in_sunlight",
        "get_relative_motion" => "get_relative_motion",
        "get_passes" => "get_passes",
        _ => "orbital-op",
    }
}

fn tle_or_fail<'t>(model: &'static str, tle: Option<&'t Tle>) -> Result<&'t Tle, InvocationError> {
    tle.ok_or_else(|| {
        InvocationError::precondition(format!("{model}: owner node carries no TLE"))
    })
}

/// Per-epoch TLE propagation (tag `ORBITAL`).
pub struct ModelOrbit {
    tle: Tle,
    /// Set when an epoch's propagation failed, to skip repeated error spam.
    last_error_epoch: Option<SimTime>,
}

impl ModelOrbit {
    pub fn new(tle_1: &str, tle_2: &str) -> Result<ModelOrbit, ModelConfigError> {
        let tle = Tle::parse(tle_1, tle_2)
            .map_err(|e| ModelConfigError::new("ModelOrbit", e.to_string()))?;
        Ok(ModelOrbit {
            tle,
            last_error_epoch: None,
        })
    }
}

impl Model for ModelOrbit {
    fn class_name(&self) -> &'static str {
        "ModelOrbit"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Orbital
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        // Propagation failures are per-epoch and non-fatal: log and skip.
        let unix = ctx.world().clock.unix_of(ctx.now());
        if let Err(err) = position_velocity_ecef(&self.tle, unix) {
            if self.last_error_epoch != Some(ctx.now()) {
                log::warn!("node {}: propagation failed: {err}", ctx.node_id());
                self.last_error_epoch = Some(ctx.now());
            }
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        let clock = ctx.world().clock;
        orbital_invoke(self.class_name(), Some(&self.tle), None, &clock, op, args, ctx)
    }
}

/// Bulk-propagating orbital model (tag `ORBITAL`).
///
/// On its first advance it propagates the node's whole window on the epoch
/// grid; queries on the grid are answered from the cache.
pub struct ModelOrbitOneFullUpdate {
    tle: Tle,
    grid: Vec<(SimTime, Vec3)>,
}

impl ModelOrbitOneFullUpdate {
    pub fn new(tle_1: &str, tle_2: &str) -> Result<ModelOrbitOneFullUpdate, ModelConfigError> {
        let tle = Tle::parse(tle_1, tle_2)
            .map_err(|e| ModelConfigError::new("ModelOrbitOneFullUpdate", e.to_string()))?;
        Ok(ModelOrbitOneFullUpdate {
            tle,
            grid: Vec::new(),
        })
    }

    fn cached_position(&self, t: SimTime) -> Option<Vec3> {
        self.grid
            .iter()
            .find(|(grid_t, _)| *grid_t == t)
            .map(|(_, pos)| *pos)
    }
}

impl Model for ModelOrbitOneFullUpdate {
    fn class_name(&self) -> &'static str {
        "ModelOrbitOneFullUpdate"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Orbital
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        if !self.grid.is_empty() {
            return;
        }
        let clock = ctx.world().clock;
        let (start, end) = ctx.node_window();
        match orbsim_geo::positions_ecef(
            &self.tle,
            clock.unix_of(start),
            clock.unix_of(end),
            clock.delta_secs(),
        ) {
            Ok(points) => {
                let base = clock.unix_of(SimTime::ZERO);
                self.grid = points
                    .into_iter()
                    .map(|(unix, pos)| (SimTime::from_secs(unix - base), pos))
                    .collect();
                log::debug!(
                    "node {}: precomputed {} orbit points",
                    ctx.node_id(),
                    self.grid.len()
                );
            }
            Err(err) => log::warn!("node {}: bulk propagation failed: {err}", ctx.node_id()),
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        if op == "get_position" {
            let at = args.opt_time("get_position", "at_time")?.unwrap_or(ctx.now());
            if let Some(pos) = self.cached_position(at) {
                return Ok(Value::Position([pos.x, pos.y, pos.z]));
            }
        }
        let clock = ctx.world().clock;
        orbital_invoke(self.class_name(), Some(&self.tle), None, &clock, op, args, ctx)
    }
}

/// Configuration for the fixed test orbit.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FixedOrbitConfig {
    /// Explicit ECEF position in meters.
    pub ecef: Option<[f64; 3]>,
    /// Alternatively: a geodetic point (possibly above ground).
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_m: Option<f64>,
    /// Forced illumination answer.
    pub sunlit: bool,
}

impl Default for FixedOrbitConfig {
    fn default() -> FixedOrbitConfig {
        FixedOrbitConfig {
            ecef: None,
            latitude: None,
            longitude: None,
            altitude_m: None,
            sunlit: true,
        }
    }
}

impl FixedOrbitConfig {
    /// Resolve the configured position.
    pub fn position(&self) -> Result<Vec3, ModelConfigError> {
        if let Some([x, y, z]) = self.ecef {
            return Ok(Vec3::new(x, y, z));
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => {
                Ok(GroundPoint::new(lat, lon, self.altitude_m.unwrap_or(0.0)).to_ecef())
            }
            _ => Err(ModelConfigError::new(
                "ModelFixedOrbit",
                "requires either ecef or latitude/longitude",
            )),
        }
    }
}

/// Fixed-position orbital model (tag `ORBITAL`), for deterministic tests.
pub struct ModelFixedOrbit {
    position: Vec3,
    sunlit: bool,
}

impl ModelFixedOrbit {
    pub fn new(cfg: &FixedOrbitConfig) -> Result<ModelFixedOrbit, ModelConfigError> {
        Ok(ModelFixedOrbit {
            position: cfg.position()?,
            sunlit: cfg.sunlit,
        })
    }
}

impl Model for ModelFixedOrbit {
    fn class_name(&self) -> &'static str {
        "ModelFixedOrbit"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Orbital
    }

    fn advance(&mut self, _ctx: &mut ModelContext<'_>) {}

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        let clock = ctx.world().clock;
        orbital_invoke(
            self.class_name(),
            None,
            Some((self.position, self.sunlit)),
            &clock,
            op,
            args,
            ctx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbsim_common::{GeoEntry, NodeKind, TopologyId};

    const LINE1: &str = "1 50985U 22002B   22290.71715197  .00032099  00000+0  13424-2 0  9994";
    const LINE2: &str = "2 50985  97.4784 357.5505 0011839 353.6613   6.4472 15.23462773 42039";

    fn catalog_with_pair() -> GeoCatalog {
        let clock = SimClock::new("2022-10-17 17:00:00", "2022-10-18 17:00:00", 30.0).unwrap();
        let mut catalog = GeoCatalog::new(clock);
        catalog.insert(
            NodeId(1),
            GeoEntry {
                kind: NodeKind::Sat,
                topology: TopologyId(0),
                window: (SimTime::ZERO, clock.end()),
                source: PositionSource::Tle(Box::new(Tle::parse(LINE1, LINE2).unwrap())),
            },
        );
        catalog.insert(
            NodeId(2),
            GeoEntry {
                kind: NodeKind::Gs,
                topology: TopologyId(0),
                window: (SimTime::ZERO, clock.end()),
                source: PositionSource::Ground(GroundPoint::new(0.0, 0.0, 0.0)),
            },
        );
        catalog
    }

    #[test]
    fn compute_passes_finds_real_leo_passes() {
        let catalog = catalog_with_pair();
        let windows = compute_passes(
            &catalog,
            NodeId(1),
            NodeId(2),
            SimTime::ZERO,
            catalog.clock().end(),
            5.0,
        )
        .unwrap();
        assert!(!windows.is_empty());
        for w in &windows {
            assert!(w.end > w.start);
        }
        // Symmetric query returns the identical table.
        let reversed = compute_passes(
            &catalog,
            NodeId(2),
            NodeId(1),
            SimTime::ZERO,
            catalog.clock().end(),
            5.0,
        )
        .unwrap();
        assert_eq!(windows, reversed);
    }

    #[test]
    fn fixed_orbit_overhead_is_one_whole_window_pass() {
        let clock = SimClock::new("2022-10-17 17:00:00", "2022-10-17 18:00:00", 1.0).unwrap();
        let mut catalog = GeoCatalog::new(clock);
        catalog.insert(
            NodeId(1),
            GeoEntry {
                kind: NodeKind::Sat,
                topology: TopologyId(0),
                window: (SimTime::ZERO, clock.end()),
                source: PositionSource::Fixed {
                    ecef: Vec3::new(orbsim_geo::EARTH_RADIUS_M + 500_000.0, 0.0, 0.0),
                    sunlit: true,
                },
            },
        );
        catalog.insert(
            NodeId(2),
            GeoEntry {
                kind: NodeKind::Gs,
                topology: TopologyId(0),
                window: (SimTime::ZERO, clock.end()),
                source: PositionSource::Ground(GroundPoint::new(0.0, 0.0, 0.0)),
            },
        );
        let windows = compute_passes(
            &catalog,
            NodeId(1),
            NodeId(2),
            SimTime::ZERO,
            clock.end(),
            10.0,
        )
        .unwrap();
        assert_eq!(
            windows,
            vec![PassInterval {
                start: SimTime::ZERO,
                end: clock.end()
            }]
        );
    }

    #[test]
    fn fixed_orbit_config_requires_a_position() {
        let cfg = FixedOrbitConfig::default();
        assert!(ModelFixedOrbit::new(&cfg).is_err());
        let cfg = FixedOrbitConfig {
            latitude: Some(0.0),
            longitude: Some(0.0),
            altitude_m: Some(500_000.0),
            ..FixedOrbitConfig::default()
        };
        let model = ModelFixedOrbit::new(&cfg).unwrap();
        assert!(model.position.norm() > orbsim_geo::EARTH_RADIUS_M);
    }
}

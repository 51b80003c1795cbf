//! Field-of-view models (tag `VIEWOFNODE`).
//!
//! Two interchangeable strategies behind the same `get_view` operation:
//!
//! - [`ModelFovElevation`] computes the elevation to every candidate at
//!   query time and thresholds it. O(candidates) per query, no state.
//! - [`ModelFovPassTable`] computes the pass table for each (satellite,
//!   ground) pair once, publishes it in the process-wide
//!   [`PassTableCache`](orbsim_common::PassTableCache), and answers queries
//!   by searching the interval list. The ground station and the satellite
//!   it watches consult the same table.

use serde::Deserialize;
use serde_json::json;

use orbsim_common::{
    EventKind, InvocationError, Kwargs, Model, ModelContext, ModelTag, NodeId, NodeKind,
    PassInterval, SimTime, Value,
};
use orbsim_geo::elevation_deg;

use crate::orbit::compute_passes;

/// Configuration shared by both FoV strategies.
#[derive(Debug, Clone, Deserialize)]
pub struct FovConfig {
    /// Minimum elevation (degrees) for a candidate to count as visible.
    pub min_elevation: f64,
}

/// Candidates for a view query: all catalog nodes of the target kinds,
/// excluding the owner.
fn candidates(ctx: &ModelContext<'_>, kinds: &[NodeKind]) -> Vec<NodeId> {
    ctx.world()
        .catalog
        .nodes_of_kinds(kinds)
        .into_iter()
        .filter(|&id| id != ctx.node_id())
        .collect()
}

fn require_kinds(args: &Kwargs) -> Result<Vec<NodeKind>, InvocationError> {
    args.opt_kinds("get_view", "target_kinds")?
        .ok_or(InvocationError::MissingArgument {
            op: "get_view",
            key: "target_kinds",
        })
}

/// Elevation-sampled field of view.
pub struct ModelFovElevation {
    min_elevation_deg: f64,
}

impl ModelFovElevation {
    pub fn new(cfg: &FovConfig) -> ModelFovElevation {
        ModelFovElevation {
            min_elevation_deg: cfg.min_elevation,
        }
    }

    fn visible(&self, ctx: &ModelContext<'_>, target: NodeId, at: SimTime) -> bool {
        let catalog = &ctx.world().catalog;
        let own_kind = ctx.node_kind();
        let Ok(own_pos) = catalog.position_of(ctx.node_id(), at) else {
            return false;
        };
        let Ok(target_pos) = catalog.position_of(target, at) else {
            return false;
        };
        if !catalog.active_at(target, at) {
            return false;
        }
        // Elevation is measured at the ground-side endpoint.
        let (sat_pos, ground_pos) = if own_kind == NodeKind::Sat {
            (own_pos, target_pos)
        } else {
            (target_pos, own_pos)
        };
        elevation_deg(sat_pos, ground_pos) >= self.min_elevation_deg
    }
}

impl Model for ModelFovElevation {
    fn class_name(&self) -> &'static str {
        "ModelFovElevation"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::ViewOfNode
    }

    fn advance(&mut self, _ctx: &mut ModelContext<'_>) {}

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "get_view" => {
                let kinds = require_kinds(args)?;
                let at = args.opt_time("get_view", "at_time")?.unwrap_or(ctx.now());
                let visible = candidates(ctx, &kinds)
                    .into_iter()
                    .filter(|&id| self.visible(ctx, id, at))
                    .collect();
                Ok(Value::NodeIds(visible))
            }
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}

/// Pass-table-backed field of view.
pub struct ModelFovPassTable {
    min_elevation_deg: f64,
}

impl ModelFovPassTable {
    pub fn new(cfg: &FovConfig) -> ModelFovPassTable {
        ModelFovPassTable {
            min_elevation_deg: cfg.min_elevation,
        }
    }

    /// The memoized table for (owner, target), computing and logging it on
    /// first use.
    fn table(&self, ctx: &ModelContext<'_>, target: NodeId) -> std::sync::Arc<Vec<PassInterval>> {
        let world = ctx.world();
        let owner = ctx.node_id();
        let catalog = std::sync::Arc::clone(&world.catalog);
        let min_elevation = self.min_elevation_deg;
        let logger = ctx.logger().clone();
        let (start, end) = ctx.node_window();
        world.passes.get_or_compute(owner, target, move || {
            match compute_passes(&catalog, owner, target, start, end, min_elevation) {
                Ok(windows) => {
                    for w in &windows {
                        logger.event(
                            w.start,
                            EventKind::PassStart,
                            json!({ "other": target, "set_s": w.end.as_secs_f64() }),
                        );
                        logger.event(
                            w.end,
                            EventKind::PassEnd,
                            json!({ "other": target, "rise_s": w.start.as_secs_f64() }),
                        );
                    }
                    windows
                }
                Err(err) => {
                    log::warn!("pass computation {owner}<->{target} failed: {err}");
                    Vec::new()
                }
            }
        })
    }

    fn in_view(&self, ctx: &ModelContext<'_>, target: NodeId, at: SimTime) -> bool {
        if !ctx.world().catalog.active_at(target, at) {
            return false;
        }
        let table = self.table(ctx, target);
        // Intervals are sorted and disjoint: binary-search the rise times.
        let idx = table.partition_point(|w| w.start <= at);
        idx > 0 && table[idx - 1].contains(at)
    }
}

impl Model for ModelFovPassTable {
    fn class_name(&self) -> &'static str {
        "ModelFovPassTable"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::ViewOfNode
    }

    fn advance(&mut self, _ctx: &mut ModelContext<'_>) {}

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "get_view" => {
                let kinds = require_kinds(args)?;
                let at = args.opt_time("get_view", "at_time")?.unwrap_or(ctx.now());
                let visible = candidates(ctx, &kinds)
                    .into_iter()
                    .filter(|&id| self.in_view(ctx, id, at))
                    .collect();
                Ok(Value::NodeIds(visible))
            }
            // Precompute the tables for every candidate of the given kinds.
            "find_passes" => {
                let kinds = args
                    .opt_kinds("find_passes", "target_kinds")?
                    .unwrap_or_else(|| vec![NodeKind::Gs, NodeKind::IotDevice]);
                let all = candidates(ctx, &kinds);
                for target in &all {
                    let _ = self.table(ctx, *target);
                }
                Ok(Value::Int(all.len() as i64))
            }
            "get_pass_windows" => {
                let target = NodeId(args.require_i64("get_pass_windows", "target")? as u32);
                let table = self.table(ctx, target);
                Ok(Value::Windows(
                    table.iter().map(|w| (w.start, w.end)).collect(),
                ))
            }
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbsim_common::{
        GeoCatalog, GeoEntry, LogLevel, MemorySink, Node, NodeLogger, PassTableCache,
        PositionSource, SharedWorld, SimClock, TopologyId,
    };
    use orbsim_geo::frame::Vec3;
    use orbsim_geo::{GroundPoint, EARTH_RADIUS_M};
    use std::sync::Arc;

    fn clock() -> SimClock {
        SimClock::new("2022-10-17 12:00:00", "2022-10-17 13:00:00", 1.0).unwrap()
    }

    fn overhead_world() -> SharedWorld {
        let clock = clock();
        let mut catalog = GeoCatalog::new(clock);
        catalog.insert(
            NodeId(1),
            GeoEntry {
                kind: NodeKind::Sat,
                topology: TopologyId(0),
                window: (SimTime::ZERO, clock.end()),
                source: PositionSource::Fixed {
                    ecef: Vec3::new(EARTH_RADIUS_M + 500_000.0, 0.0, 0.0),
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
        // A ground station on the far side of the planet.
        catalog.insert(
            NodeId(3),
            GeoEntry {
                kind: NodeKind::Gs,
                topology: TopologyId(0),
                window: (SimTime::ZERO, clock.end()),
                source: PositionSource::Ground(GroundPoint::new(0.0, 180.0, 0.0)),
            },
        );
        SharedWorld {
            clock,
            catalog: Arc::new(catalog),
            passes: Arc::new(PassTableCache::new()),
        }
    }

    fn sat_node(sink: Arc<MemorySink>, model: Box<dyn Model>) -> Node {
        let mut node = Node::new(
            NodeId(1),
            NodeKind::Sat,
            "SatelliteBasic",
            TopologyId(0),
            (SimTime::ZERO, clock().end()),
            SimTime::from_secs(1.0),
            NodeLogger::new(NodeId(1), LogLevel::All, clock(), sink),
            1,
        );
        node.push_model(model);
        node
    }

    fn query_view(node: &mut Node, world: &SharedWorld) -> Vec<NodeId> {
        let mut outbox = Vec::new();
        let mut args = Kwargs::new();
        args.insert("target_kinds", Value::Kinds(vec![NodeKind::Gs]));
        let result = node
            .invoke(
                &orbsim_common::ModelSelector::Tag(ModelTag::ViewOfNode),
                "get_view",
                &mut args,
                SimTime::ZERO,
                world,
                &mut outbox,
            )
            .unwrap();
        match result {
            Value::NodeIds(ids) => ids,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn elevation_fov_sees_only_the_near_station() {
        let world = overhead_world();
        let sink = Arc::new(MemorySink::new());
        let mut node = sat_node(
            sink,
            Box::new(ModelFovElevation::new(&FovConfig { min_elevation: 10.0 })),
        );
        assert_eq!(query_view(&mut node, &world), vec![NodeId(2)]);
    }

    #[test]
    fn pass_table_fov_agrees_with_elevation_fov() {
        let world = overhead_world();
        let sink = Arc::new(MemorySink::new());
        let mut node = sat_node(
            sink.clone(),
            Box::new(ModelFovPassTable::new(&FovConfig { min_elevation: 10.0 })),
        );
        assert_eq!(query_view(&mut node, &world), vec![NodeId(2)]);
        // First query computed and logged the overhead pass.
        assert_eq!(sink.of_kind(EventKind::PassStart).len(), 1);
        assert_eq!(sink.of_kind(EventKind::PassEnd).len(), 1);
        // Both pair tables are now memoized (near and far station).
        assert!(world.passes.contains(NodeId(1), NodeId(2)));
        assert!(world.passes.contains(NodeId(1), NodeId(3)));
    }

    #[test]
    fn repeated_queries_reuse_the_memo() {
        let world = overhead_world();
        let sink = Arc::new(MemorySink::new());
        let mut node = sat_node(
            sink.clone(),
            Box::new(ModelFovPassTable::new(&FovConfig { min_elevation: 10.0 })),
        );
        let first = query_view(&mut node, &world);
        let tables_after_first = world.passes.len();
        let second = query_view(&mut node, &world);
        assert_eq!(first, second);
        assert_eq!(world.passes.len(), tables_after_first);
        // Pass logs are not duplicated on re-query.
        assert_eq!(sink.of_kind(EventKind::PassStart).len(), 1);
    }

    #[test]
    fn missing_target_kinds_is_reported() {
        let world = overhead_world();
        let sink = Arc::new(MemorySink::new());
        let mut node = sat_node(
            sink,
            Box::new(ModelFovElevation::new(&FovConfig { min_elevation: 0.0 })),
        );
        let mut outbox = Vec::new();
        let mut args = Kwargs::new();
        let err = node
            .invoke(
                &orbsim_common::ModelSelector::Tag(ModelTag::ViewOfNode),
                "get_view",
                &mut args,
                SimTime::ZERO,
                &world,
                &mut outbox,
            )
            .unwrap_err();
        assert!(matches!(err, InvocationError::MissingArgument { .. }));
    }
}

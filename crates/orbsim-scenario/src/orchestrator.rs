//! The orchestrator: scenario tree in, wired node graph out.
//!
//! Per node: resolve the node class, instantiate models in source order
//! through their registry factories, verify the owner-class filter, check
//! the CNF dependency expression against the declared siblings, and
//! topologically order the models (declaration order breaks ties). A final
//! wiring pass builds the geometry catalog, validates ISL peers and radio
//! `(class, frequency)` uniqueness, and injects the pass-table cache.
//!
//! This module is the only place nodes and models are constructed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use orbsim_common::{
    GeoCatalog, GeoEntry, LogSink, Model, Node, NodeId, NodeLogger, PassTableCache,
    PositionSource, RadioClass, SharedWorld, SimClock, SimTime, Topology, TopologyId,
};
use orbsim_geo::{GroundPoint, Tle};
use orbsim_models::FixedOrbitConfig;

use crate::error::{ConfigError, OrchestrationError};
use crate::registry::{ModelBuildCtx, ModelClassSpec, Registry};
use crate::schema::{NodeDoc, ScenarioDoc};

/// A fully orchestrated simulation, ready for the manager.
pub struct BuiltSimulation {
    pub topologies: Vec<Topology>,
    pub world: SharedWorld,
    pub clock: SimClock,
    pub seed: u64,
    /// Worker threads granted for parallel same-epoch advance; 1 keeps the
    /// deterministic sequential default.
    pub workers: usize,
}

impl std::fmt::Debug for BuiltSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltSimulation")
            .field("topologies_len", &self.topologies.len())
            .field("seed", &self.seed)
            .field("workers", &self.workers)
            .finish()
    }
}

/// Node activity window, defaulting to the scenario window.
fn node_window(doc: &NodeDoc, clock: &SimClock) -> Result<(SimTime, SimTime), ConfigError> {
    let start = match &doc.starttime {
        Some(raw) => clock.offset_of(raw)?,
        None => SimTime::ZERO,
    };
    let end = match &doc.endtime {
        Some(raw) => clock.offset_of(raw)?,
        None => clock.end(),
    };
    Ok((start, end.min(clock.end())))
}

/// The node's position source: a declared fixed-orbit model wins,
/// otherwise satellites carry TLEs and ground nodes geodetic points.
fn position_source(
    doc: &NodeDoc,
    node_id: NodeId,
    kind: orbsim_common::NodeKind,
) -> Result<PositionSource, ConfigError> {
    if let Some(model) = doc.models.iter().find(|m| m.iname == "ModelFixedOrbit") {
        let cfg: FixedOrbitConfig =
            serde_json::from_value(serde_json::Value::Object(model.config.clone())).map_err(
                |e| ConfigError::BadModelConfig {
                    node: node_id,
                    model: "ModelFixedOrbit".to_string(),
                    reason: e.to_string(),
                },
            )?;
        let ecef = cfg.position().map_err(|e| ConfigError::BadModelConfig {
            node: node_id,
            model: "ModelFixedOrbit".to_string(),
            reason: e.to_string(),
        })?;
        return Ok(PositionSource::Fixed {
            ecef,
            sunlit: cfg.sunlit,
        });
    }

    let bad = |reason: String| ConfigError::BadNodeConfig {
        node: node_id,
        class: doc.iname.clone(),
        reason,
    };
    match kind {
        orbsim_common::NodeKind::Sat => {
            let tle_1 = doc
                .extra
                .get("tle_1")
                .and_then(|v| v.as_str())
                .ok_or_else(|| bad("satellite requires tle_1".to_string()))?;
            let tle_2 = doc
                .extra
                .get("tle_2")
                .and_then(|v| v.as_str())
                .ok_or_else(|| bad("satellite requires tle_2".to_string()))?;
            let tle = Tle::parse(tle_1, tle_2).map_err(|e| bad(e.to_string()))?;
            Ok(PositionSource::Tle(Box::new(tle)))
        }
        orbsim_common::NodeKind::Gs | orbsim_common::NodeKind::IotDevice => {
            let latitude = doc
                .extra
                .get("latitude")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| bad("ground node requires latitude".to_string()))?;
            let longitude = doc
                .extra
                .get("longitude")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| bad("ground node requires longitude".to_string()))?;
            let elevation = doc
                .extra
                .get("elevation")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            Ok(PositionSource::Ground(GroundPoint::new(
                latitude, longitude, elevation,
            )))
        }
    }
}

/// Stable topological order of the node's models.
///
/// Edges run dependency -> dependent for every declared sibling that can
/// satisfy a clause. Kahn's algorithm; the ready set is drained in
/// declaration order so unrelated models keep their written order.
fn dependency_order(
    node_id: NodeId,
    specs: &[&ModelClassSpec],
) -> Result<Vec<usize>, OrchestrationError> {
    let n = specs.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (dependent, spec) in specs.iter().enumerate() {
        for clause in spec.dependencies {
            for (provider, candidate) in specs.iter().enumerate() {
                if provider != dependent && clause.contains(&candidate.name) {
                    successors[provider].push(dependent);
                    in_degree[dependent] += 1;
                }
            }
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);
        for &succ in &successors[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }
    if order.len() != n {
        let cycle = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| specs[i].name.to_string())
            .collect();
        return Err(OrchestrationError::CyclicDependency {
            node: node_id,
            cycle,
        });
    }
    Ok(order)
}

/// Build the full simulation from a parsed scenario document.
///
/// `sink` receives the structured event log; tests typically inject a
/// memory sink. `workers` is the execution-resource allocation handed to
/// the manager.
pub fn build_simulation(
    doc: &ScenarioDoc,
    registry: &Registry,
    sink: Arc<dyn LogSink>,
    workers: usize,
) -> Result<BuiltSimulation, OrchestrationError> {
    let clock = SimClock::new(
        &doc.simtime.starttime,
        &doc.simtime.endtime,
        doc.simtime.delta,
    )
    .map_err(ConfigError::from)?;

    let mut master_rng = ChaCha8Rng::seed_from_u64(doc.seed);

    // Pass 1: identity checks and the geometry catalog.
    let mut catalog = GeoCatalog::new(clock);
    let mut seen_nodes: BTreeSet<NodeId> = BTreeSet::new();
    let mut seen_topologies: BTreeSet<u32> = BTreeSet::new();
    for topology in &doc.topologies {
        if !seen_topologies.insert(topology.id) {
            return Err(ConfigError::DuplicateTopologyId(topology.id).into());
        }
        for node_doc in &topology.nodes {
            let node_id = NodeId(node_doc.nodeid);
            if !seen_nodes.insert(node_id) {
                return Err(ConfigError::DuplicateNodeId(node_id).into());
            }
            let class = registry.node_class(&node_doc.iname)?;
            if class.kind != node_doc.kind {
                return Err(ConfigError::NodeKindMismatch {
                    node: node_id,
                    declared: node_doc.kind.as_label().to_string(),
                    class: class.name.to_string(),
                    actual: class.kind.as_label().to_string(),
                }
                .into());
            }
            let window = node_window(node_doc, &clock)?;
            let source = position_source(node_doc, node_id, class.kind)?;
            catalog.insert(
                node_id,
                GeoEntry {
                    kind: class.kind,
                    topology: TopologyId(topology.id),
                    window,
                    source,
                },
            );
        }
    }

    // Pass 2: nodes and models.
    let mut topologies = Vec::with_capacity(doc.topologies.len());
    for topology_doc in &doc.topologies {
        let mut topology = Topology::new(TopologyId(topology_doc.id), topology_doc.name.clone());
        for node_doc in &topology_doc.nodes {
            let node_id = NodeId(node_doc.nodeid);
            let class = registry.node_class(&node_doc.iname)?;
            let window = node_window(node_doc, &clock)?;
            let logger = NodeLogger::new(node_id, node_doc.loglevel, clock, Arc::clone(&sink));
            let node_seed: u64 = master_rng.gen();
            let mut node = Node::new(
                node_id,
                class.kind,
                class.name,
                TopologyId(topology_doc.id),
                window,
                clock.delta(),
                logger,
                node_seed,
            );

            // Instantiate in source order.
            let mut specs: Vec<&ModelClassSpec> = Vec::with_capacity(node_doc.models.len());
            let mut instances: Vec<Box<dyn Model>> = Vec::with_capacity(node_doc.models.len());
            for model_doc in &node_doc.models {
                let spec = registry.model_class(&model_doc.iname)?;
                if !spec.supported_node_classes.is_empty()
                    && !spec.supported_node_classes.contains(&class.name)
                {
                    return Err(OrchestrationError::UnsupportedOwner {
                        node: node_id,
                        node_class: class.name.to_string(),
                        model: spec.name,
                    });
                }
                let ctx = ModelBuildCtx {
                    node_id,
                    node_kind: class.kind,
                    node_class: class.name,
                    config: &model_doc.config,
                    node_extra: &node_doc.extra,
                };
                instances.push((spec.factory)(&ctx)?);
                specs.push(spec);
            }

            // Resolve the CNF dependency expressions against the siblings.
            let present: BTreeSet<&str> = specs.iter().map(|s| s.name).collect();
            for spec in &specs {
                for clause in spec.dependencies {
                    if !clause.iter().any(|alt| present.contains(alt)) {
                        return Err(OrchestrationError::UnsatisfiedDependency {
                            node: node_id,
                            model: spec.name,
                            alternatives: clause.to_vec(),
                        });
                    }
                }
            }

            // Topological order, stable on declaration order.
            let order = dependency_order(node_id, &specs)?;
            let mut slots: Vec<Option<Box<dyn Model>>> =
                instances.into_iter().map(Some).collect();
            for index in order {
                if let Some(model) = slots[index].take() {
                    node.push_model(model);
                }
            }

            topology.push_node(node);
        }
        topologies.push(topology);
    }

    // Pass 3: wiring. Radio uniqueness and ISL peer resolution need every
    // node to exist first.
    for topology in &topologies {
        for node in topology.nodes() {
            let mut seen: BTreeMap<(RadioClass, u64), u32> = BTreeMap::new();
            for (class_name, port) in node.radio_ports() {
                let key = (port.class, port.phy.frequency_hz.round() as u64);
                if seen.insert(key, port.radio_id.0).is_some() {
                    return Err(ConfigError::AmbiguousRadio {
                        node: node.id(),
                        class: class_name.to_string(),
                        frequency_hz: port.phy.frequency_hz,
                    }
                    .into());
                }
                if port.class == RadioClass::Isl {
                    for peer in &port.peers {
                        if catalog.entry(*peer).is_none() {
                            return Err(ConfigError::UnknownIslPeer {
                                node: node.id(),
                                peer: *peer,
                            }
                            .into());
                        }
                    }
                }
            }
        }
    }

    let world = SharedWorld {
        clock,
        catalog: Arc::new(catalog),
        passes: Arc::new(PassTableCache::new()),
    };

    log::info!(
        "orchestrated {} topologies, {} nodes, {} epochs",
        topologies.len(),
        seen_nodes.len(),
        clock.epoch_count()
    );

    Ok(BuiltSimulation {
        topologies,
        world,
        clock,
        seed: doc.seed,
        workers: workers.max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbsim_common::{MemorySink, ModelTag};

    fn build(doc_json: &str) -> Result<BuiltSimulation, OrchestrationError> {
        let doc = ScenarioDoc::from_json(doc_json).map_err(ConfigError::from)?;
        build_simulation(&doc, &Registry::builtin(), Arc::new(MemorySink::new()), 1)
    }

    fn sat_header() -> &'static str {
        r#""nodeid": 1, "type": "SAT", "iname": "SatelliteBasic",
           "tle_1": "1 50985U 22002B   22290.71715197  .00032099  00000+0  13424-2 0  9994",
           "tle_2": "2 50985  97.4784 357.5505 0011839 353.6613   6.4472 15.23462773 42039""#
    }

    fn scenario(nodes: &str) -> String {
        format!(
            r#"{{
                "topologies": [{{"name": "t", "id": 0, "nodes": [{nodes}]}}],
                "simtime": {{
                    "starttime": "2022-10-17 12:00:00",
                    "endtime": "2022-10-17 12:10:00",
                    "delta": 1.0
                }},
                "simlogsetup": {{"loghandler": "memory"}}
            }}"#
        )
    }

    #[test]
    fn models_end_up_in_dependency_order() {
        // Declared MAC-first; execution order must put FoV/radio/store
        // ahead of the MAC and the orbit ahead of power.
        let json = scenario(&format!(
            r#"{{{header},
                "models": [
                    {{"iname": "ModelMacTtnc", "beacon_interval": 30.0,
                      "beacon_backoff": 0.0, "beacon_frequency": 401e6,
                      "downlink_frequency": 402e6, "radio_class": "ModelLoraRadio"}},
                    {{"iname": "ModelLoraRadio"}},
                    {{"iname": "ModelDataStore"}},
                    {{"iname": "ModelFovElevation", "min_elevation": 5.0}},
                    {{"iname": "ModelOrbit"}}
                ]
            }}"#,
            header = sat_header()
        ));
        let built = build(&json).unwrap();
        let node = &built.topologies[0].nodes()[0];
        let classes = node.model_classes();
        let pos = |name: &str| classes.iter().position(|c| *c == name).unwrap();
        assert!(pos("ModelFovElevation") < pos("ModelLoraRadio"));
        assert!(pos("ModelLoraRadio") < pos("ModelMacTtnc"));
        assert!(pos("ModelDataStore") < pos("ModelMacTtnc"));
        assert!(node.has_model_with_tag(ModelTag::Orbital));
    }

    #[test]
    fn unsatisfied_dependency_fails_before_any_epoch() {
        let json = scenario(&format!(
            r#"{{{header},
                "models": [
                    {{"iname": "ModelOrbit"}},
                    {{"iname": "ModelDataStore"}},
                    {{"iname": "ModelImagingLogicBased",
                      "time_to_image": 5.0, "image_size": 1024}}
                ]
            }}"#,
            header = sat_header()
        ));
        let err = build(&json).unwrap_err();
        match err {
            OrchestrationError::UnsatisfiedDependency { model, alternatives, .. } => {
                assert_eq!(model, "ModelImagingLogicBased");
                assert_eq!(alternatives, vec!["ModelPower"]);
            }
            other => panic!("expected UnsatisfiedDependency, got {other}"),
        }
    }

    #[test]
    fn unsupported_owner_is_rejected() {
        let json = scenario(
            r#"{"nodeid": 2, "type": "GS", "iname": "GroundStationBasic",
                "latitude": 0.0, "longitude": 0.0,
                "models": [{"iname": "ModelAdacs"}]}"#,
        );
        assert!(matches!(
            build(&json).unwrap_err(),
            OrchestrationError::UnsupportedOwner { .. }
        ));
    }

    #[test]
    fn unknown_model_class_is_a_config_error() {
        let json = scenario(&format!(
            r#"{{{header}, "models": [{{"iname": "ModelWarpDrive"}}]}}"#,
            header = sat_header()
        ));
        assert!(matches!(
            build(&json).unwrap_err(),
            OrchestrationError::Config(ConfigError::UnknownModelClass { .. })
        ));
    }

    #[test]
    fn duplicate_radio_frequency_is_rejected_at_wiring() {
        let json = scenario(&format!(
            r#"{{{header},
                "models": [
                    {{"iname": "ModelFovElevation", "min_elevation": 5.0}},
                    {{"iname": "ModelDownlinkRadio",
                      "phy_setup": {{"frequency_hz": 401e6}}}},
                    {{"iname": "ModelAggregatorRadio",
                      "phy_setup": {{"frequency_hz": 401e6}}}}
                ]
            }}"#,
            header = sat_header()
        ));
        assert!(matches!(
            build(&json).unwrap_err(),
            OrchestrationError::Config(ConfigError::AmbiguousRadio { .. })
        ));
    }

    #[test]
    fn isl_peers_must_exist() {
        let json = scenario(&format!(
            r#"{{{header},
                "models": [{{"iname": "ModelIslRadio", "connected_nodes": [99]}}]
            }}"#,
            header = sat_header()
        ));
        assert!(matches!(
            build(&json).unwrap_err(),
            OrchestrationError::Config(ConfigError::UnknownIslPeer { .. })
        ));
    }

    #[test]
    fn ground_node_requires_geodetic_position() {
        let json = scenario(
            r#"{"nodeid": 2, "type": "GS", "iname": "GroundStationBasic", "models": []}"#,
        );
        assert!(matches!(
            build(&json).unwrap_err(),
            OrchestrationError::Config(ConfigError::BadNodeConfig { .. })
        ));
    }

    #[test]
    fn fixed_orbit_model_overrides_the_tle_requirement() {
        let json = scenario(
            r#"{"nodeid": 1, "type": "SAT", "iname": "SatelliteBasic",
                "models": [{"iname": "ModelFixedOrbit",
                            "latitude": 0.0, "longitude": 0.0,
                            "altitude_m": 500000.0}]}"#,
        );
        let built = build(&json).unwrap();
        let pos = built
            .world
            .catalog
            .position_of(NodeId(1), SimTime::ZERO)
            .unwrap();
        assert!(pos.norm() > orbsim_geo::EARTH_RADIUS_M);
    }
}

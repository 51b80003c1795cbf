//! Node and model kernel.
//!
//! A node owns an ordered list of models (dependency-topological order,
//! established by the orchestrator). Each epoch the node advances its
//! models in that order. Models talk to their siblings synchronously
//! through [`ModelContext`]: the calling model's slot is vacated for the
//! duration of its turn, so handing out a mutable borrow of any *other*
//! sibling is sound, and re-entrant calls into a vacated slot fail with
//! `PreconditionFailed` instead of aliasing.

use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::SharedWorld;
use crate::logging::NodeLogger;
use crate::radio_port::{RadioPort, Transmission};
use crate::time::SimTime;
use crate::value::{InvocationError, Kwargs, Value};
use crate::{NodeId, TopologyId};

/// Coarse node category, used by FoV queries and MAC target filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "SAT")]
    Sat,
    #[serde(rename = "GS")]
    Gs,
    #[serde(rename = "IOTDEVICE")]
    IotDevice,
}

impl NodeKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            NodeKind::Sat => "SAT",
            NodeKind::Gs => "GS",
            NodeKind::IotDevice => "IOTDEVICE",
        }
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<NodeKind, String> {
        match s {
            "SAT" => Ok(NodeKind::Sat),
            "GS" => Ok(NodeKind::Gs),
            "IOTDEVICE" => Ok(NodeKind::IotDevice),
            other => Err(format!("unknown node kind {other:?}")),
        }
    }
}

/// Capability tag of a model. Sibling models discover each other by tag
/// without naming concrete classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelTag {
    Power,
    Orbital,
    ViewOfNode,
    BasicLoraRadio,
    DataGenerator,
    DataStore,
    Isl,
    Mac,
    Adacs,
    Imaging,
    ImagingRadio,
    Compute,
    Scheduler,
}

impl ModelTag {
    pub fn as_label(&self) -> &'static str {
        match self {
            ModelTag::Power => "POWER",
            ModelTag::Orbital => "ORBITAL",
            ModelTag::ViewOfNode => "VIEWOFNODE",
            ModelTag::BasicLoraRadio => "BASICLORARADIO",
            ModelTag::DataGenerator => "DATAGENERATOR",
            ModelTag::DataStore => "DATASTORE",
            ModelTag::Isl => "ISL",
            ModelTag::Mac => "MAC",
            ModelTag::Adacs => "ADACS",
            ModelTag::Imaging => "IMAGING",
            ModelTag::ImagingRadio => "IMAGINGRADIO",
            ModelTag::Compute => "COMPUTE",
            ModelTag::Scheduler => "SCHEDULER",
        }
    }
}

impl std::str::FromStr for ModelTag {
    type Err = String;

    fn from_str(s: &str) -> Result<ModelTag, String> {
        match s {
            "POWER" => Ok(ModelTag::Power),
            "ORBITAL" => Ok(ModelTag::Orbital),
            "VIEWOFNODE" => Ok(ModelTag::ViewOfNode),
            "BASICLORARADIO" => Ok(ModelTag::BasicLoraRadio),
            "DATAGENERATOR" => Ok(ModelTag::DataGenerator),
            "DATASTORE" => Ok(ModelTag::DataStore),
            "ISL" => Ok(ModelTag::Isl),
            "MAC" => Ok(ModelTag::Mac),
            "ADACS" => Ok(ModelTag::Adacs),
            "IMAGING" => Ok(ModelTag::Imaging),
            "IMAGINGRADIO" => Ok(ModelTag::ImagingRadio),
            "COMPUTE" => Ok(ModelTag::Compute),
            "SCHEDULER" => Ok(ModelTag::Scheduler),
            other => Err(format!("unknown model tag {other:?}")),
        }
    }
}

/// A behavior unit resident in a node.
pub trait Model: Send {
    /// Implementation class name, matching the registry key.
    fn class_name(&self) -> &'static str;

    /// Capability tag.
    fn tag(&self) -> ModelTag;

    /// One epoch of work. May be a no-op for pure helper models.
    fn advance(&mut self, ctx: &mut ModelContext<'_>);

    /// Dynamic named-operation surface.
    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError>;

    /// Radio models expose their port to the link fabric; everything else
    /// returns `None`.
    fn as_radio_port(&self) -> Option<&RadioPort> {
        None
    }

    fn as_radio_port_mut(&mut self) -> Option<&mut RadioPort> {
        None
    }
}

/// How a caller addresses a model inside a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelector {
    Tag(ModelTag),
    Class(String),
}

impl ModelSelector {
    /// Parse either a tag label (`"POWER"`) or a class name
    /// (`"ModelPower"`).
    pub fn parse(raw: &str) -> ModelSelector {
        match raw.parse::<ModelTag>() {
            Ok(tag) => ModelSelector::Tag(tag),
            Err(_) => ModelSelector::Class(raw.to_string()),
        }
    }
}

struct Slot {
    class_name: &'static str,
    tag: ModelTag,
    model: Option<Box<dyn Model>>,
}

impl Slot {
    fn matches(&self, selector: &ModelSelector) -> bool {
        match selector {
            ModelSelector::Tag(tag) => self.tag == *tag,
            ModelSelector::Class(name) => self.class_name == name.as_str(),
        }
    }
}

/// A simulated node: identity, time window, logger, RNG stream, and the
/// ordered model list.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    class_name: String,
    topology: TopologyId,
    /// Activity window as offsets from scenario start.
    window: (SimTime, SimTime),
    delta: SimTime,
    timestamp: SimTime,
    logger: NodeLogger,
    rng: ChaCha8Rng,
    slots: Vec<Slot>,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: NodeId,
        kind: NodeKind,
        class_name: impl Into<String>,
        topology: TopologyId,
        window: (SimTime, SimTime),
        delta: SimTime,
        logger: NodeLogger,
        rng_seed: u64,
    ) -> Node {
        Node {
            id,
            kind,
            class_name: class_name.into(),
            topology,
            window,
            delta,
            timestamp: window.0,
            logger,
            rng: ChaCha8Rng::seed_from_u64(rng_seed),
            slots: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn topology(&self) -> TopologyId {
        self.topology
    }

    pub fn window(&self) -> (SimTime, SimTime) {
        self.window
    }

    pub fn delta(&self) -> SimTime {
        self.delta
    }

    /// Last time this node advanced (or its window start before the first
    /// epoch).
    pub fn timestamp(&self) -> SimTime {
        self.timestamp
    }

    pub fn logger(&self) -> &NodeLogger {
        &self.logger
    }

    /// Append a model. The orchestrator pushes models in dependency order;
    /// nothing re-sorts afterwards.
    pub fn push_model(&mut self, model: Box<dyn Model>) {
        self.slots.push(Slot {
            class_name: model.class_name(),
            tag: model.tag(),
            model: Some(model),
        });
    }

    /// Class names of resident models, in execution order.
    pub fn model_classes(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.class_name).collect()
    }

    pub fn has_model_with_tag(&self, tag: ModelTag) -> bool {
        self.slots.iter().any(|s| s.tag == tag)
    }

    pub fn has_model_with_class(&self, name: &str) -> bool {
        self.slots.iter().any(|s| s.class_name == name)
    }

    /// Whether `t` falls inside this node's activity window.
    pub fn active_at(&self, t: SimTime) -> bool {
        self.window.0 <= t && t <= self.window.1
    }

    /// Advance every resident model once, in dependency order. Outside the
    /// node's window this is a no-op.
    pub fn advance(&mut self, now: SimTime, world: &SharedWorld, outbox: &mut Vec<Transmission>) {
        if !self.active_at(now) {
            return;
        }
        self.timestamp = now;
        for i in 0..self.slots.len() {
            let Some(mut model) = self.slots[i].model.take() else {
                continue;
            };
            {
                let mut ctx = ModelContext {
                    now,
                    node: self,
                    world,
                    outbox,
                };
                model.advance(&mut ctx);
            }
            self.slots[i].model = Some(model);
        }
    }

    /// Advance repeatedly by delta until the end of the node's window.
    /// Returns the transmissions the models emitted, for callers that step
    /// a node in isolation.
    pub fn advance_to_end(&mut self, world: &SharedWorld) -> Vec<Transmission> {
        let mut outbox = Vec::new();
        let mut t = self.timestamp;
        while t <= self.window.1 {
            self.advance(t, world, &mut outbox);
            t = t + self.delta;
        }
        outbox
    }

    /// Invoke an operation on the first model matching `selector`.
    pub fn invoke(
        &mut self,
        selector: &ModelSelector,
        op: &str,
        args: &mut Kwargs,
        now: SimTime,
        world: &SharedWorld,
        outbox: &mut Vec<Transmission>,
    ) -> Result<Value, InvocationError> {
        let index = self
            .slots
            .iter()
            .position(|s| s.matches(selector))
            .ok_or_else(|| {
                InvocationError::precondition(format!(
                    "node {} has no model matching {selector:?}",
                    self.id
                ))
            })?;
        let mut model = self.slots[index].model.take().ok_or_else(|| {
            InvocationError::precondition(format!(
                "model {} of node {} is mid-call",
                self.slots[index].class_name, self.id
            ))
        })?;
        let result = {
            let mut ctx = ModelContext {
                now,
                node: self,
                world,
                outbox,
            };
            model.invoke(op, args, &mut ctx)
        };
        self.slots[index].model = Some(model);
        result
    }

    /// Iterate radio ports (mutably) for the link fabric.
    pub fn radio_ports_mut(&mut self) -> impl Iterator<Item = (&'static str, &mut RadioPort)> {
        self.slots.iter_mut().filter_map(|s| {
            let class = s.class_name;
            s.model
                .as_mut()
                .and_then(|m| m.as_radio_port_mut())
                .map(move |port| (class, port))
        })
    }

    pub fn radio_ports(&self) -> impl Iterator<Item = (&'static str, &RadioPort)> {
        self.slots.iter().filter_map(|s| {
            let class = s.class_name;
            s.model
                .as_ref()
                .and_then(|m| m.as_radio_port())
                .map(move |port| (class, port))
        })
    }
}

/// A named, ordered group of nodes.
pub struct Topology {
    id: TopologyId,
    name: String,
    nodes: Vec<Node>,
}

impl Topology {
    pub fn new(id: TopologyId, name: impl Into<String>) -> Topology {
        Topology {
            id,
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn id(&self) -> TopologyId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id() == id)
    }
}

/// Locate a node by id across topologies (node ids are scenario-unique).
pub fn find_node_mut(topologies: &mut [Topology], id: NodeId) -> Option<&mut Node> {
    topologies.iter_mut().find_map(|t| t.node_mut(id))
}

/// Immutable variant of [`find_node_mut`].
pub fn find_node(topologies: &[Topology], id: NodeId) -> Option<&Node> {
    topologies.iter().find_map(|t| t.node(id))
}

/// Per-call context handed to a model while it runs.
///
/// Grants access to node identity, the shared world, the node RNG and
/// logger, sibling invocation, and the transmission outbox.
pub struct ModelContext<'a> {
    now: SimTime,
    node: &'a mut Node,
    world: &'a SharedWorld,
    outbox: &'a mut Vec<Transmission>,
}

impl<'a> ModelContext<'a> {
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn delta(&self) -> SimTime {
        self.node.delta
    }

    pub fn delta_secs(&self) -> f64 {
        self.node.delta.as_secs_f64()
    }

    pub fn node_id(&self) -> NodeId {
        self.node.id
    }

    pub fn node_kind(&self) -> NodeKind {
        self.node.kind
    }

    pub fn topology(&self) -> TopologyId {
        self.node.topology
    }

    pub fn node_window(&self) -> (SimTime, SimTime) {
        self.node.window
    }

    pub fn world(&self) -> &SharedWorld {
        self.world
    }

    pub fn logger(&self) -> &NodeLogger {
        &self.node.logger
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.node.rng
    }

    /// Stage a transmission with the link fabric. Delivery (or drop)
    /// happens at the end of the current epoch.
    pub fn emit_transmission(&mut self, tx: Transmission) {
        self.outbox.push(tx);
    }

    pub fn has_sibling_with_tag(&self, tag: ModelTag) -> bool {
        self.node.has_model_with_tag(tag)
    }

    pub fn has_sibling_with_class(&self, name: &str) -> bool {
        self.node.has_model_with_class(name)
    }

    /// Invoke an operation on a sibling model found by tag.
    pub fn invoke_sibling_by_tag(
        &mut self,
        tag: ModelTag,
        op: &str,
        args: &mut Kwargs,
    ) -> Result<Value, InvocationError> {
        self.invoke_sibling(&ModelSelector::Tag(tag), op, args)
    }

    /// Invoke an operation on a sibling model found by class name.
    pub fn invoke_sibling_by_class(
        &mut self,
        class: &str,
        op: &str,
        args: &mut Kwargs,
    ) -> Result<Value, InvocationError> {
        self.invoke_sibling(&ModelSelector::Class(class.to_string()), op, args)
    }

    fn invoke_sibling(
        &mut self,
        selector: &ModelSelector,
        op: &str,
        args: &mut Kwargs,
    ) -> Result<Value, InvocationError> {
        let now = self.now;
        self.node
            .invoke(selector, op, args, now, self.world, self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, MemorySink};
    use crate::time::SimClock;
    use crate::GeoCatalog;
    use std::sync::Arc;

    struct Counter {
        count: i64,
    }

    impl Model for Counter {
        fn class_name(&self) -> &'static str {
            "Counter"
        }
        fn tag(&self) -> ModelTag {
            ModelTag::DataStore
        }
        fn advance(&mut self, _ctx: &mut ModelContext<'_>) {
            self.count += 1;
        }
        fn invoke(
            &mut self,
            op: &str,
            _args: &mut Kwargs,
            _ctx: &mut ModelContext<'_>,
        ) -> Result<Value, InvocationError> {
            match op {
                "get_count" => Ok(Value::Int(self.count)),
                other => Err(InvocationError::UnknownOperation {
                    model: "Counter",
                    op: other.to_string(),
                }),
            }
        }
    }

    /// Reads the sibling counter during its own advance.
    struct Reader {
        last_seen: i64,
    }

    impl Model for Reader {
        fn class_name(&self) -> &'static str {
            "Reader"
        }
        fn tag(&self) -> ModelTag {
            ModelTag::Mac
        }
        fn advance(&mut self, ctx: &mut ModelContext<'_>) {
            let mut args = Kwargs::new();
            if let Ok(v) = ctx.invoke_sibling_by_tag(ModelTag::DataStore, "get_count", &mut args) {
                self.last_seen = v.as_i64().unwrap_or(-1);
            }
        }
        fn invoke(
            &mut self,
            op: &str,
            _args: &mut Kwargs,
            _ctx: &mut ModelContext<'_>,
        ) -> Result<Value, InvocationError> {
            match op {
                "get_last_seen" => Ok(Value::Int(self.last_seen)),
                // Calls back into itself by class, which must fail instead
                // of aliasing.
                "reenter" => _ctx.invoke_sibling_by_class("Reader", "get_last_seen", _args),
                other => Err(InvocationError::UnknownOperation {
                    model: "Reader",
                    op: other.to_string(),
                }),
            }
        }
    }

    fn world() -> SharedWorld {
        let clock = SimClock::new("2022-10-17 12:00:00", "2022-10-17 13:00:00", 1.0).unwrap();
        SharedWorld {
            clock,
            catalog: Arc::new(GeoCatalog::new(clock)),
            passes: Arc::new(crate::PassTableCache::new()),
        }
    }

    fn test_node(window_end_s: f64) -> Node {
        let clock = SimClock::new("2022-10-17 12:00:00", "2022-10-17 13:00:00", 1.0).unwrap();
        Node::new(
            NodeId(1),
            NodeKind::Sat,
            "SatelliteBasic",
            TopologyId(0),
            (SimTime::ZERO, SimTime::from_secs(window_end_s)),
            SimTime::from_secs(1.0),
            NodeLogger::new(NodeId(1), LogLevel::All, clock, Arc::new(MemorySink::new())),
            42,
        )
    }

    #[test]
    fn advance_runs_models_in_declared_order_with_sibling_reads() {
        let mut node = test_node(3600.0);
        node.push_model(Box::new(Counter { count: 0 }));
        node.push_model(Box::new(Reader { last_seen: -1 }));
        let world = world();
        let mut outbox = Vec::new();
        node.advance(SimTime::ZERO, &world, &mut outbox);
        // Counter advanced before Reader: reader sees the incremented value.
        let mut args = Kwargs::new();
        let seen = node
            .invoke(
                &ModelSelector::Class("Reader".into()),
                "get_last_seen",
                &mut args,
                SimTime::ZERO,
                &world,
                &mut outbox,
            )
            .unwrap();
        assert_eq!(seen, Value::Int(1));
    }

    #[test]
    fn reentrant_invocation_is_a_precondition_failure() {
        let mut node = test_node(3600.0);
        node.push_model(Box::new(Reader { last_seen: 0 }));
        let world = world();
        let mut outbox = Vec::new();
        let mut args = Kwargs::new();
        let err = node
            .invoke(
                &ModelSelector::Class("Reader".into()),
                "reenter",
                &mut args,
                SimTime::ZERO,
                &world,
                &mut outbox,
            )
            .unwrap_err();
        assert!(matches!(err, InvocationError::PreconditionFailed { .. }));
    }

    #[test]
    fn advance_outside_window_is_a_no_op() {
        let mut node = test_node(10.0);
        node.push_model(Box::new(Counter { count: 0 }));
        let world = world();
        let mut outbox = Vec::new();
        node.advance(SimTime::from_secs(11.0), &world, &mut outbox);
        let mut args = Kwargs::new();
        let count = node
            .invoke(
                &ModelSelector::Tag(ModelTag::DataStore),
                "get_count",
                &mut args,
                SimTime::ZERO,
                &world,
                &mut outbox,
            )
            .unwrap();
        assert_eq!(count, Value::Int(0));
    }

    #[test]
    fn advance_to_end_realizes_every_epoch_in_window() {
        let mut node = test_node(10.0);
        node.push_model(Box::new(Counter { count: 0 }));
        let world = world();
        node.advance_to_end(&world);
        let mut args = Kwargs::new();
        let mut outbox = Vec::new();
        let count = node
            .invoke(
                &ModelSelector::Tag(ModelTag::DataStore),
                "get_count",
                &mut args,
                SimTime::ZERO,
                &world,
                &mut outbox,
            )
            .unwrap();
        // Window [0, 10] at delta 1 -> 11 epochs.
        assert_eq!(count, Value::Int(11));
    }

    #[test]
    fn missing_model_is_reported() {
        let mut node = test_node(10.0);
        let world = world();
        let mut outbox = Vec::new();
        let mut args = Kwargs::new();
        let err = node
            .invoke(
                &ModelSelector::Tag(ModelTag::Power),
                "has_energy",
                &mut args,
                SimTime::ZERO,
                &world,
                &mut outbox,
            )
            .unwrap_err();
        assert!(matches!(err, InvocationError::PreconditionFailed { .. }));
    }
}

//! # orbsim-common
//!
//! Shared types and the node/model kernel for the orbsim simulator.
//!
//! This crate provides:
//! - Simulated time ([`SimTime`]) and the scenario clock ([`SimClock`])
//! - Node and model identity ([`NodeId`], [`NodeKind`], [`ModelTag`])
//! - The dynamic operation surface ([`Value`], [`Kwargs`], [`InvocationError`])
//! - The node/model kernel ([`Node`], [`Model`], [`ModelContext`])
//! - Data and frame types shared by radios and MACs ([`DataUnit`], [`MacFrame`])
//! - The radio port the link fabric operates on ([`RadioPort`], [`Transmission`])
//! - The geometry catalog and pass-table cache ([`GeoCatalog`], [`PassTableCache`])
//! - Structured simulation event logging ([`LogRecord`], [`LogSink`], [`NodeLogger`])

pub mod catalog;
pub mod data;
pub mod kernel;
pub mod logging;
pub mod radio_port;
pub mod time;
pub mod value;

pub use catalog::{GeoCatalog, GeoEntry, PassInterval, PassTableCache, PositionSource, SharedWorld};
pub use data::{DataKind, DataUnit, MacFrame};
pub use kernel::{
    find_node, find_node_mut, Model, ModelContext, ModelSelector, ModelTag, Node, NodeKind,
    Topology,
};
pub use logging::{EventKind, LogLevel, LogRecord, LogSink, MemorySink, NodeLogger, NullSink};
pub use radio_port::{DropReason, PhySetup, RadioClass, RadioPort, ReceivedFrame, Transmission};
pub use time::{SimClock, SimTime, TimeParseError};
pub use value::{InvocationError, Kwargs, Value};

use serde::{Deserialize, Serialize};

/// Scenario-unique node identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Topology identifier, unique within a scenario.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TopologyId(pub u32);

impl std::fmt::Display for TopologyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Radio device identifier. Defaults to the owner node id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RadioId(pub u32);

impl std::fmt::Display for RadioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

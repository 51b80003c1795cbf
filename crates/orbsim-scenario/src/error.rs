//! Orchestration-time error taxonomy.
//!
//! Everything here is fatal before the first epoch. Per-epoch failures are
//! confined to the originating model and never surface as these types.

use thiserror::Error;

use orbsim_common::{NodeId, TimeParseError};

/// Malformed scenario, unknown class name, or missing required key.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("simulation time: {0}")]
    Time(#[from] TimeParseError),

    #[error("unknown node class {name:?}")]
    UnknownNodeClass { name: String },

    #[error("unknown model class {name:?}")]
    UnknownModelClass { name: String },

    #[error("node {node}: declared type {declared} but class {class} is a {actual} class")]
    NodeKindMismatch {
        node: NodeId,
        declared: String,
        class: String,
        actual: String,
    },

    #[error("duplicate node id {0}")]
    DuplicateNodeId(NodeId),

    #[error("duplicate topology id {0}")]
    DuplicateTopologyId(u32),

    #[error("node {node} ({class}): {reason}")]
    BadNodeConfig {
        node: NodeId,
        class: String,
        reason: String,
    },

    #[error("node {node}: model {model}: {reason}")]
    BadModelConfig {
        node: NodeId,
        model: String,
        reason: String,
    },

    #[error("node {node}: two radios share (class {class}, {frequency_hz} Hz)")]
    AmbiguousRadio {
        node: NodeId,
        class: String,
        frequency_hz: f64,
    },

    #[error("node {node}: ISL peer {peer} does not exist")]
    UnknownIslPeer { node: NodeId, peer: NodeId },

    #[error("unknown log handler {name:?}")]
    UnknownLogHandler { name: String },

    #[error("cannot read scenario {path}: {reason}")]
    ScenarioIo { path: String, reason: String },
}

/// Failures while composing nodes and models.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("node {node} ({node_class}): model {model} does not support this node class")]
    UnsupportedOwner {
        node: NodeId,
        node_class: String,
        model: &'static str,
    },

    #[error("node {node}: model {model} needs one of {alternatives:?} as a sibling")]
    UnsatisfiedDependency {
        node: NodeId,
        model: &'static str,
        alternatives: Vec<&'static str>,
    },

    #[error("node {node}: cyclic model dependencies among {cycle:?}")]
    CyclicDependency { node: NodeId, cycle: Vec<String> },
}

impl OrchestrationError {
    /// Process exit code mandated by the CLI contract: 2 for configuration
    /// errors, 3 for dependency-resolution failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestrationError::Config(_) => 2,
            OrchestrationError::UnsupportedOwner { .. }
            | OrchestrationError::UnsatisfiedDependency { .. }
            | OrchestrationError::CyclicDependency { .. } => 3,
        }
    }
}

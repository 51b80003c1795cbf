//! # orbsim-scenario
//!
//! Scenario loading and orchestration: the JSON schema contract, the
//! capability registry mapping class names to factories with declared
//! `(tag, supported-owner, dependency)` metadata, and the orchestrator
//! that turns a parsed scenario into a fully wired, dependency-ordered
//! node graph.
//!
//! Orchestration errors are fatal before the first epoch runs; nothing is
//! logged to the simulation event sink until the manager starts.

pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod schema;

pub use error::{ConfigError, OrchestrationError};
pub use orchestrator::{build_simulation, BuiltSimulation};
pub use registry::{ModelBuildCtx, ModelClassSpec, NodeClassSpec, Registry};
pub use schema::{LogSetupDoc, ModelDoc, NodeDoc, ScenarioDoc, SimTimeDoc, TopologyDoc};

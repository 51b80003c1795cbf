//! # orbsim-runner
//!
//! The manager (epoch scheduler), the runtime control plane, log sinks,
//! and the CLI entry point for orbsim.
//!
//! The manager drives fixed epochs over the orchestrated node graph:
//! within an epoch, topologies advance in declaration order, nodes in
//! topology order, and models in their dependency order; the link fabric
//! resolves all staged transmissions at the epoch barrier; queued runtime
//! calls are drained; then time moves by exactly one delta.

pub mod control;
pub mod manager;
pub mod sink;

pub use control::{PendingCall, RuntimeApiError, SimulatorHandle};
pub use manager::{Manager, SimulationStats};
pub use sink::{sink_from_setup, ThreadedJsonSink};

use thiserror::Error;

/// Fatal runner failures.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Orchestration(#[from] orbsim_scenario::OrchestrationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation; aborts the manager.
    #[error("fatal runtime error: {0}")]
    Fatal(String),
}

impl RunnerError {
    /// Process exit code: 0 success, 2 config, 3 dependency resolution,
    /// 4 runtime fatal.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunnerError::Orchestration(err) => err.exit_code(),
            RunnerError::Io(_) | RunnerError::Fatal(_) => 4,
        }
    }
}

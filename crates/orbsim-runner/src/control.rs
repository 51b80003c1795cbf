//! Runtime control plane.
//!
//! A [`SimulatorHandle`] is the thread-safe entry point outside callers use
//! while the simulation runs. Calls are queued over an mpsc channel and
//! drained by the manager at the epoch boundary, so they never interleave
//! with model advance. Every call carries a one-shot completion channel;
//! dropping a [`PendingCall`] abandons the result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use thiserror::Error;

use orbsim_common::{InvocationError, Kwargs, ModelSelector, NodeId, TopologyId, Value};

/// Errors surfaced to runtime-API callers.
#[derive(Debug, Error)]
pub enum RuntimeApiError {
    #[error("unknown runtime api {0:?}")]
    UnknownApi(String),

    #[error("runtime api request: {0}")]
    BadRequest(String),

    #[error("topology {0} not found")]
    TopologyNotFound(TopologyId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// The manager finished (or was terminated) before answering.
    #[error("simulation terminated")]
    Terminated,
}

/// A parsed runtime request.
#[derive(Debug)]
pub(crate) enum RuntimeOp {
    CallModelApi {
        topology: TopologyId,
        node: NodeId,
        model: ModelSelector,
        op: String,
        args: Kwargs,
    },
    GetNodeInfo {
        topology: TopologyId,
        node: NodeId,
        info: String,
    },
    GetCurrentEpoch,
    Terminate,
}

pub(crate) struct RuntimeCall {
    pub op: RuntimeOp,
    pub reply: mpsc::SyncSender<Result<Value, RuntimeApiError>>,
}

/// One-shot completion handle for a submitted call.
pub struct PendingCall {
    rx: mpsc::Receiver<Result<Value, RuntimeApiError>>,
}

impl PendingCall {
    /// Block until the manager answers at an epoch boundary.
    pub fn wait(self) -> Result<Value, RuntimeApiError> {
        self.rx.recv().unwrap_or(Err(RuntimeApiError::Terminated))
    }
}

/// Thread-safe entry point into a running simulation.
#[derive(Clone)]
pub struct SimulatorHandle {
    tx: mpsc::Sender<RuntimeCall>,
    stop: Arc<AtomicBool>,
}

impl SimulatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<RuntimeCall>, stop: Arc<AtomicBool>) -> SimulatorHandle {
        SimulatorHandle { tx, stop }
    }

    fn parse(api: &str, mut kwargs: Kwargs) -> Result<RuntimeOp, RuntimeApiError> {
        let need_id = |kwargs: &Kwargs, key: &str| -> Result<u32, RuntimeApiError> {
            kwargs
                .get(key)
                .and_then(|v| v.as_i64())
                .map(|v| v as u32)
                .ok_or_else(|| RuntimeApiError::BadRequest(format!("missing integer {key:?}")))
        };
        let need_str = |kwargs: &Kwargs, key: &str| -> Result<String, RuntimeApiError> {
            kwargs
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| RuntimeApiError::BadRequest(format!("missing string {key:?}")))
        };

        match api {
            "call_model_api" => {
                let topology = TopologyId(need_id(&kwargs, "topology_id")?);
                let node = NodeId(need_id(&kwargs, "node_id")?);
                let model = ModelSelector::parse(&need_str(&kwargs, "model")?);
                let op = need_str(&kwargs, "op")?;
                // Everything else in the bag is forwarded to the operation.
                kwargs.take("topology_id");
                kwargs.take("node_id");
                kwargs.take("model");
                kwargs.take("op");
                Ok(RuntimeOp::CallModelApi {
                    topology,
                    node,
                    model,
                    op,
                    args: kwargs,
                })
            }
            "get_node_info" => Ok(RuntimeOp::GetNodeInfo {
                topology: TopologyId(need_id(&kwargs, "topology_id")?),
                node: NodeId(need_id(&kwargs, "node_id")?),
                info: need_str(&kwargs, "info")?,
            }),
            "get_current_epoch" => Ok(RuntimeOp::GetCurrentEpoch),
            "terminate" => Ok(RuntimeOp::Terminate),
            other => Err(RuntimeApiError::UnknownApi(other.to_string())),
        }
    }

    /// Submit a call without waiting. The result arrives through the
    /// returned [`PendingCall`]; dropping it abandons the result.
    pub fn submit(&self, api: &str, kwargs: Kwargs) -> Result<PendingCall, RuntimeApiError> {
        let op = Self::parse(api, kwargs)?;
        if matches!(op, RuntimeOp::Terminate) {
            // Terminate is a flag checked at the next epoch boundary, so it
            // also works when the call queue is already full of laggards.
            self.stop.store(true, Ordering::Relaxed);
        }
        let (reply, rx) = mpsc::sync_channel(1);
        self.tx
            .send(RuntimeCall { op, reply })
            .map_err(|_| RuntimeApiError::Terminated)?;
        Ok(PendingCall { rx })
    }

    /// Submit a call and block until the epoch boundary answers it.
    pub fn call(&self, api: &str, kwargs: Kwargs) -> Result<Value, RuntimeApiError> {
        self.submit(api, kwargs)?.wait()
    }
}

//! The manager: fixed-epoch scheduler over the orchestrated node graph.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use orbsim_common::{Kwargs, ModelSelector, NodeId, SimTime, TopologyId, Transmission, Value};
use orbsim_radio::resolve_epoch;
use orbsim_scenario::BuiltSimulation;

use crate::control::{RuntimeApiError, RuntimeCall, RuntimeOp, SimulatorHandle};
use crate::RunnerError;

/// Counters reported when the manager returns.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SimulationStats {
    /// Epochs actually executed (terminate can cut the run short).
    pub epochs_run: u64,
    /// Transmissions staged with the fabric.
    pub transmissions: u64,
    /// Frames delivered into receive queues.
    pub packets_delivered: u64,
    /// Frames dropped anywhere in the fabric.
    pub packets_dropped: u64,
    /// Runtime-API calls served.
    pub runtime_calls: u64,
    /// Wall-clock run time.
    pub wall_time_ms: u64,
}

/// Epoch scheduler and runtime-call broker.
pub struct Manager {
    sim: BuiltSimulation,
    stop: Arc<AtomicBool>,
    calls: mpsc::Receiver<RuntimeCall>,
    handle_tx: mpsc::Sender<RuntimeCall>,
    stats: SimulationStats,
    /// Simulated time of the most recent epoch, for info queries.
    current_time: SimTime,
    /// Transmissions emitted by runtime calls between epochs; they join the
    /// next epoch's batch.
    carryover: Vec<Transmission>,
}

impl Manager {
    pub fn new(sim: BuiltSimulation) -> Manager {
        let (handle_tx, calls) = mpsc::channel();
        Manager {
            sim,
            stop: Arc::new(AtomicBool::new(false)),
            calls,
            handle_tx,
            stats: SimulationStats::default(),
            current_time: SimTime::ZERO,
            carryover: Vec::new(),
        }
    }

    /// A cloneable control-plane handle. Valid before and during `run`.
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle::new(self.handle_tx.clone(), Arc::clone(&self.stop))
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Read access for post-run inspection.
    pub fn topologies(&self) -> &[orbsim_common::Topology] {
        &self.sim.topologies
    }

    /// Invoke a model operation directly. Used by the runtime dispatch and
    /// by tests before or after a run.
    pub fn invoke_model(
        &mut self,
        topology: TopologyId,
        node: NodeId,
        selector: &ModelSelector,
        op: &str,
        args: &mut Kwargs,
    ) -> Result<Value, RuntimeApiError> {
        let now = self.current_time;
        let world = self.sim.world.clone();
        let topology = self
            .sim
            .topologies
            .iter_mut()
            .find(|t| t.id() == topology)
            .ok_or(RuntimeApiError::TopologyNotFound(topology))?;
        let node = topology
            .node_mut(node)
            .ok_or(RuntimeApiError::NodeNotFound(node))?;
        node.invoke(selector, op, args, now, &world, &mut self.carryover)
            .map_err(RuntimeApiError::from)
    }

    fn handle_call(&mut self, call: RuntimeCall) {
        let result = match call.op {
            RuntimeOp::Terminate => {
                self.stop.store(true, Ordering::Relaxed);
                Ok(Value::Null)
            }
            RuntimeOp::GetCurrentEpoch => Ok(Value::Time(self.current_time)),
            RuntimeOp::GetNodeInfo {
                topology,
                node,
                info,
            } => self.node_info(topology, node, &info),
            RuntimeOp::CallModelApi {
                topology,
                node,
                model,
                op,
                mut args,
            } => self.invoke_model(topology, node, &model, &op, &mut args),
        };
        self.stats.runtime_calls += 1;
        // A dropped PendingCall abandoned the result; that is fine.
        let _ = call.reply.send(result);
    }

    fn node_info(
        &self,
        topology: TopologyId,
        node: NodeId,
        info: &str,
    ) -> Result<Value, RuntimeApiError> {
        let topology = self
            .sim
            .topologies
            .iter()
            .find(|t| t.id() == topology)
            .ok_or(RuntimeApiError::TopologyNotFound(topology))?;
        let node = topology
            .node(node)
            .ok_or(RuntimeApiError::NodeNotFound(node))?;
        match info {
            "time" => Ok(Value::Time(node.timestamp())),
            "position" => {
                let pos = self
                    .sim
                    .world
                    .catalog
                    .position_of(node.id(), self.current_time)
                    .map_err(|e| RuntimeApiError::BadRequest(e.to_string()))?;
                Ok(Value::Position([pos.x, pos.y, pos.z]))
            }
            other => Err(RuntimeApiError::BadRequest(format!(
                "unknown info kind {other:?}"
            ))),
        }
    }

    /// Advance every node one epoch, honoring the worker allocation.
    fn advance_all(&mut self, t: SimTime, outbox: &mut Vec<Transmission>) {
        let world = &self.sim.world;
        if self.sim.workers > 1 && self.sim.topologies.len() > 1 {
            // Parallel mode: one worker per topology, no cross-node calls
            // outside the fabric, all deliveries at the barrier below.
            let mut partial: Vec<Vec<Transmission>> = Vec::new();
            std::thread::scope(|scope| {
                let mut handles = Vec::new();
                for topology in self.sim.topologies.iter_mut() {
                    handles.push(scope.spawn(move || {
                        let mut local = Vec::new();
                        for node in topology.nodes_mut() {
                            node.advance(t, world, &mut local);
                        }
                        local
                    }));
                }
                for handle in handles {
                    partial.push(handle.join().expect("topology worker panicked"));
                }
            });
            // Merge in topology order to keep resolution deterministic.
            for mut local in partial {
                outbox.append(&mut local);
            }
        } else {
            for topology in self.sim.topologies.iter_mut() {
                for node in topology.nodes_mut() {
                    node.advance(t, world, outbox);
                }
            }
        }
    }

    /// Run to the end of the scenario window (or until terminated).
    pub fn run(&mut self) -> Result<SimulationStats, RunnerError> {
        let started = Instant::now();
        let epochs = self.sim.clock.epoch_count();
        let delta = self.sim.clock.delta();
        let mut t = SimTime::ZERO;

        for epoch in 0..epochs {
            if self.stop.load(Ordering::Relaxed) {
                log::info!("terminated at epoch {epoch}");
                break;
            }
            if t < self.current_time {
                return Err(RunnerError::Fatal(format!(
                    "non-monotonic time: {t} after {}",
                    self.current_time
                )));
            }
            self.current_time = t;

            let mut outbox = std::mem::take(&mut self.carryover);
            self.advance_all(t, &mut outbox);
            self.stats.transmissions += outbox.len() as u64;

            let report = resolve_epoch(t, &outbox, &mut self.sim.topologies, &self.sim.world);
            self.stats.packets_delivered += report.delivered;
            self.stats.packets_dropped += report.dropped;

            // Epoch boundary: drain queued runtime calls.
            while let Ok(call) = self.calls.try_recv() {
                self.handle_call(call);
            }

            self.stats.epochs_run += 1;
            if epoch % 600 == 0 {
                log::info!(
                    "epoch {epoch}/{epochs} t={t} delivered={} dropped={}",
                    self.stats.packets_delivered,
                    self.stats.packets_dropped
                );
            }
            t = t + delta;
        }

        // Answer stragglers, then close the intake so any later submit
        // fails fast instead of waiting on a boundary that will never come.
        while let Ok(call) = self.calls.try_recv() {
            self.handle_call(call);
        }
        let (closed_tx, closed_rx) = mpsc::channel();
        drop(closed_tx);
        self.calls = closed_rx;

        self.stats.wall_time_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "simulation finished: {} epochs, {} delivered, {} dropped, {} ms",
            self.stats.epochs_run,
            self.stats.packets_delivered,
            self.stats.packets_dropped,
            self.stats.wall_time_ms
        );
        Ok(self.stats)
    }
}

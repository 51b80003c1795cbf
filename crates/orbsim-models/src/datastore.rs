//! Data queue models: store, generator, and relay.
//!
//! All three expose the bounded-FIFO surface (`add_data`, `get_data`,
//! `get_queue`, `get_queue_size`); the store adds `peek_data` and
//! `remove_data` for the TT&C serve/ACK cycle, and the generator fills
//! itself by a Poisson arrival process.

use std::collections::VecDeque;

use rand_distr::{Distribution, Poisson};
use serde::Deserialize;

use orbsim_common::{
    DataKind, DataUnit, EventKind, InvocationError, Kwargs, MacFrame, Model, ModelContext,
    ModelTag, Value,
};
use serde_json::json;

/// Shared bounded FIFO backing the data models.
struct DataQueue {
    units: VecDeque<DataUnit>,
    capacity: usize,
}

impl DataQueue {
    fn new(capacity: usize) -> DataQueue {
        DataQueue {
            units: VecDeque::new(),
            capacity,
        }
    }

    fn push(&mut self, unit: DataUnit) -> bool {
        if self.capacity != 0 && self.units.len() >= self.capacity {
            return false;
        }
        self.units.push_back(unit);
        true
    }

    fn pop(&mut self) -> Option<DataUnit> {
        self.units.pop_front()
    }

    fn len(&self) -> usize {
        self.units.len()
    }

    /// First `count` units without removing them.
    fn peek(&self, count: usize) -> Vec<DataUnit> {
        self.units.iter().take(count).cloned().collect()
    }

    /// Remove units by data id; returns how many were removed.
    fn remove_ids(&mut self, ids: &[u64]) -> usize {
        let before = self.units.len();
        self.units.retain(|u| !ids.contains(&u.id));
        before - self.units.len()
    }

    fn snapshot(&self) -> Vec<DataUnit> {
        self.units.iter().cloned().collect()
    }

    /// The queue surface shared by store and generator.
    fn invoke(
        &mut self,
        model: &'static str,
        op: &str,
        args: &mut Kwargs,
    ) -> Result<Value, InvocationError> {
        match op {
            "add_data" => {
                let unit = args.take_data("add_data", "data")?;
                Ok(Value::Bool(self.push(unit)))
            }
            "get_data" => Ok(self.pop().into()),
            "peek_data" => {
                let count = args.require_i64("peek_data", "count")?.max(0) as usize;
                Ok(Value::DataList(self.peek(count)))
            }
            "remove_data" => {
                let ids = args.take_ids("remove_data", "ids")?;
                Ok(Value::Int(self.remove_ids(&ids) as i64))
            }
            "get_queue" => Ok(Value::DataList(self.snapshot())),
            "get_queue_size" => Ok(Value::Int(self.len() as i64)),
            other => Err(InvocationError::UnknownOperation {
                model,
                op: other.to_string(),
            }),
        }
    }
}

/// Configuration of the plain data store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DataStoreConfig {
    /// Queue bound; zero means unbounded.
    pub queue_size: usize,
}

/// Bounded FIFO of data units (tag `DATASTORE`).
pub struct ModelDataStore {
    queue: DataQueue,
}

impl ModelDataStore {
    pub fn new(cfg: &DataStoreConfig) -> ModelDataStore {
        ModelDataStore {
            queue: DataQueue::new(cfg.queue_size),
        }
    }
}

impl Model for ModelDataStore {
    fn class_name(&self) -> &'static str {
        "ModelDataStore"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::DataStore
    }

    fn advance(&mut self, _ctx: &mut ModelContext<'_>) {}

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        _ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        self.queue.invoke(self.class_name(), op, args)
    }
}

/// Configuration of the Poisson data generator.
#[derive(Debug, Clone, Deserialize)]
pub struct DataGeneratorConfig {
    /// Mean arrivals per second.
    pub lambda: f64,
    /// Fixed payload size in bytes.
    pub payload_size: u64,
    /// Queue bound; zero means unbounded.
    #[serde(default)]
    pub queue_size: usize,
}

/// Self-filling data source (tag `DATAGENERATOR`).
///
/// Each epoch draws `Poisson(lambda * delta)` new sensor units. `stop` halts
/// generation; stopping twice is a no-op and subsequent epochs add nothing.
pub struct ModelDataGenerator {
    queue: DataQueue,
    lambda_per_s: f64,
    payload_size: u64,
    next_seq: u32,
    stopped: bool,
}

impl ModelDataGenerator {
    pub fn new(cfg: &DataGeneratorConfig) -> ModelDataGenerator {
        ModelDataGenerator {
            queue: DataQueue::new(cfg.queue_size),
            lambda_per_s: cfg.lambda.max(0.0),
            payload_size: cfg.payload_size,
            next_seq: 0,
            stopped: false,
        }
    }
}

impl Model for ModelDataGenerator {
    fn class_name(&self) -> &'static str {
        "ModelDataGenerator"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::DataGenerator
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        if self.stopped || self.lambda_per_s == 0.0 {
            return;
        }
        let mean = self.lambda_per_s * ctx.delta_secs();
        let arrivals = match Poisson::new(mean) {
            Ok(dist) => dist.sample(ctx.rng()) as u64,
            Err(_) => 0,
        };
        for _ in 0..arrivals {
            let unit = DataUnit {
                id: DataUnit::compose_id(ctx.node_id(), self.next_seq),
                kind: DataKind::Sensor,
                size_bytes: self.payload_size,
                created_at: ctx.now(),
                source_node: ctx.node_id(),
            };
            self.next_seq += 1;
            if !self.queue.push(unit) {
                log::debug!("node {}: generator queue full, unit dropped", ctx.node_id());
            }
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        _ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "stop" => {
                self.stopped = true;
                Ok(Value::Null)
            }
            other => self.queue.invoke(self.class_name(), other, args),
        }
    }
}

/// Bent-pipe relay (tag `DATASTORE`): every data frame received on the
/// sibling imaging radio is queued straight back for transmission.
pub struct ModelDataRelay {
    next_seq: u32,
}

impl ModelDataRelay {
    pub fn new() -> ModelDataRelay {
        ModelDataRelay { next_seq: 0 }
    }
}

impl Default for ModelDataRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for ModelDataRelay {
    fn class_name(&self) -> &'static str {
        "ModelDataRelay"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::DataStore
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        let own_radio = {
            let mut args = Kwargs::new();
            ctx.invoke_sibling_by_tag(ModelTag::ImagingRadio, "get_radio_id", &mut args)
                .ok()
                .and_then(|v| v.as_i64())
                .map(|id| orbsim_common::RadioId(id as u32))
        };
        let Some(own_radio) = own_radio else {
            return;
        };
        loop {
            let mut args = Kwargs::new();
            let received = ctx
                .invoke_sibling_by_tag(ModelTag::ImagingRadio, "get_received_packet", &mut args)
                .unwrap_or(Value::Null);
            let frame = match received {
                Value::Frame(f) => f,
                _ => break,
            };
            let MacFrame::Data { payload, .. } = frame else {
                continue;
            };
            ctx.logger().event(
                ctx.now(),
                EventKind::PacketTx,
                json!({ "relayed_data_id": payload.id }),
            );
            let forwarded = MacFrame::Data {
                frame_id: DataUnit::compose_id(ctx.node_id(), self.next_seq),
                source_radio: own_radio,
                dest_radio: None,
                sequence: self.next_seq,
                payload,
            };
            self.next_seq += 1;
            let mut args = Kwargs::new().with("packet", forwarded);
            let _ = ctx.invoke_sibling_by_tag(
                ModelTag::ImagingRadio,
                "add_packet_to_transmit",
                &mut args,
            );
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        _args: &mut Kwargs,
        _ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        Err(InvocationError::UnknownOperation {
            model: self.class_name(),
            op: op.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbsim_common::{NodeId, SimTime};

    fn unit(id: u64) -> DataUnit {
        DataUnit {
            id,
            kind: DataKind::Sensor,
            size_bytes: 24,
            created_at: SimTime::ZERO,
            source_node: NodeId(1),
        }
    }

    #[test]
    fn fifo_order_and_bound() {
        let mut queue = DataQueue::new(2);
        assert!(queue.push(unit(1)));
        assert!(queue.push(unit(2)));
        assert!(!queue.push(unit(3)));
        assert_eq!(queue.pop().unwrap().id, 1);
        assert_eq!(queue.pop().unwrap().id, 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn peek_does_not_remove_and_remove_is_by_id() {
        let mut queue = DataQueue::new(0);
        for id in 1..=4 {
            queue.push(unit(id));
        }
        let peeked = queue.peek(2);
        assert_eq!(peeked.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.remove_ids(&[2, 4, 99]), 2);
        assert_eq!(
            queue.snapshot().iter().map(|u| u.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn surface_reports_unknown_operation() {
        let mut store = ModelDataStore::new(&DataStoreConfig::default());
        let err = store
            .queue
            .invoke("ModelDataStore", "compress", &mut Kwargs::new())
            .unwrap_err();
        assert!(matches!(err, InvocationError::UnknownOperation { .. }));
    }

    #[test]
    fn generator_stop_is_idempotent_and_halts_arrivals() {
        use orbsim_common::{
            GeoCatalog, LogLevel, MemorySink, ModelSelector, ModelTag, Node, NodeKind,
            NodeLogger, PassTableCache, SharedWorld, SimClock, TopologyId,
        };
        use std::sync::Arc;

        let clock = SimClock::new("2022-10-17 12:00:00", "2022-10-17 13:00:00", 1.0).unwrap();
        let world = SharedWorld {
            clock,
            catalog: Arc::new(GeoCatalog::new(clock)),
            passes: Arc::new(PassTableCache::new()),
        };
        let mut node = Node::new(
            NodeId(4),
            NodeKind::IotDevice,
            "IotBasic",
            TopologyId(0),
            (SimTime::ZERO, clock.end()),
            clock.delta(),
            NodeLogger::new(NodeId(4), LogLevel::All, clock, Arc::new(MemorySink::new())),
            99,
        );
        node.push_model(Box::new(ModelDataGenerator::new(&DataGeneratorConfig {
            lambda: 50.0,
            payload_size: 16,
            queue_size: 0,
        })));

        let mut outbox = Vec::new();
        let selector = ModelSelector::Tag(ModelTag::DataGenerator);
        let size = |node: &mut Node, outbox: &mut Vec<_>| -> i64 {
            node.invoke(
                &selector,
                "get_queue_size",
                &mut Kwargs::new(),
                SimTime::ZERO,
                &world,
                outbox,
            )
            .unwrap()
            .as_i64()
            .unwrap()
        };

        for epoch in 0..5u64 {
            node.advance(SimTime::from_secs(epoch as f64), &world, &mut outbox);
        }
        let filled = size(&mut node, &mut outbox);
        assert!(filled > 0, "lambda 50/s produced nothing over 5 epochs");

        // Stop twice: the second is a no-op, and nothing arrives afterwards.
        for _ in 0..2 {
            node.invoke(
                &selector,
                "stop",
                &mut Kwargs::new(),
                SimTime::ZERO,
                &world,
                &mut outbox,
            )
            .unwrap();
        }
        for epoch in 5..10u64 {
            node.advance(SimTime::from_secs(epoch as f64), &world, &mut outbox);
        }
        assert_eq!(size(&mut node, &mut outbox), filled);
    }
}

//! Onboard compute model (tag `COMPUTE`).
//!
//! A bounded task queue processed at a fixed per-unit cost. Work is
//! fractional across epochs: with a 60 s epoch and 11 s per unit, five
//! units complete and the sixth carries over into the next epoch. The
//! power sibling gates processing through `has_energy("COMPUTE")`.

use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;

use orbsim_common::{
    DataUnit, EventKind, InvocationError, Kwargs, Model, ModelContext, ModelTag, SimTime, Value,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ComputeConfig {
    /// Seconds of compute per data unit.
    pub time_to_process: f64,
    /// Queue bound; zero means unbounded.
    #[serde(default)]
    pub queue_size: usize,
}

/// Fixed-cost task processor (tag `COMPUTE`).
pub struct ModelCompute {
    time_to_process: f64,
    queue_size: usize,
    queue: VecDeque<DataUnit>,
    /// Unit carried over from the previous epoch, and when it finishes.
    in_flight: Option<(DataUnit, SimTime)>,
    completed: u64,
}

impl ModelCompute {
    pub fn new(cfg: &ComputeConfig) -> ModelCompute {
        ModelCompute {
            time_to_process: cfg.time_to_process.max(0.0),
            queue_size: cfg.queue_size,
            queue: VecDeque::new(),
            in_flight: None,
            completed: 0,
        }
    }

    fn complete(&mut self, ctx: &mut ModelContext<'_>, unit: DataUnit) {
        self.completed += 1;
        ctx.logger().event(
            ctx.now(),
            EventKind::ComputeCompleted,
            json!({ "data_id": unit.id, "completed_total": self.completed }),
        );
    }
}

impl Model for ModelCompute {
    fn class_name(&self) -> &'static str {
        "ModelCompute"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Compute
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        let mut available_s = ctx.delta_secs();

        // Finish the carried-over unit first.
        if let Some((unit, done_at)) = self.in_flight.take() {
            if done_at <= ctx.now() + ctx.delta() {
                available_s -= done_at.seconds_since(ctx.now()).min(available_s);
                self.complete(ctx, unit);
            } else {
                self.in_flight = Some((unit, done_at));
                return;
            }
        }

        if available_s <= 0.0 || self.queue.is_empty() {
            return;
        }
        let mut args = Kwargs::new().with("tag", "COMPUTE");
        let powered = ctx
            .invoke_sibling_by_tag(ModelTag::Power, "has_energy", &mut args)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if !powered {
            return;
        }

        if self.time_to_process == 0.0 {
            while let Some(unit) = self.queue.pop_front() {
                self.complete(ctx, unit);
            }
            return;
        }

        // Whole units that fit in the remaining epoch time.
        let whole = (available_s / self.time_to_process).floor() as usize;
        for _ in 0..whole {
            match self.queue.pop_front() {
                Some(unit) => self.complete(ctx, unit),
                None => return,
            }
        }
        // Start one more unit with the leftover fraction; it completes in a
        // later epoch.
        let leftover_s = available_s - whole as f64 * self.time_to_process;
        if leftover_s > 0.0 {
            if let Some(unit) = self.queue.pop_front() {
                let remaining = self.time_to_process - leftover_s;
                let done_at = ctx.now() + ctx.delta() + SimTime::from_secs(remaining);
                self.in_flight = Some((unit, done_at));
            }
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "add_data" => {
                let unit = args.take_data("add_data", "data")?;
                if self.queue_size != 0 && self.queue.len() >= self.queue_size {
                    return Ok(Value::Bool(false));
                }
                ctx.logger().event(
                    ctx.now(),
                    EventKind::ComputeEnqueued,
                    json!({ "data_id": unit.id, "queue_size": self.queue.len() + 1 }),
                );
                self.queue.push_back(unit);
                Ok(Value::Bool(true))
            }
            "get_queue_size" => {
                let pending = self.queue.len() + usize::from(self.in_flight.is_some());
                Ok(Value::Int(pending as i64))
            }
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}

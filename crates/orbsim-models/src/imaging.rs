//! Imaging model (tag `IMAGING`).
//!
//! Captures images at a fixed per-image duration whenever imaging is
//! possible: the orbital sibling reports sunlight, the power sibling grants
//! `IMAGING` energy, and the ADACS sibling (when present) reports stable
//! pointing. Completed images land in the sibling datastore one epoch
//! after capture, matching the capture-then-readout pipeline.

use serde::Deserialize;
use serde_json::json;

use orbsim_common::{
    DataKind, DataUnit, EventKind, InvocationError, Kwargs, Model, ModelContext, ModelTag,
    SimTime, Value,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ImagingConfig {
    /// Seconds to capture and read out one image.
    pub time_to_image: f64,
    /// Image size in bytes.
    pub image_size: u64,
    /// Idle seconds between successive captures.
    #[serde(default)]
    pub imaging_interval: f64,
    /// When false, images are only taken through the `take_image` op.
    #[serde(default = "default_self_ctrl")]
    pub self_ctrl: bool,
}

fn default_self_ctrl() -> bool {
    true
}

/// Logic-driven imager (tag `IMAGING`).
pub struct ModelImagingLogicBased {
    /// Effective per-image duration (capture + configured idle gap).
    cycle_s: f64,
    capture_s: f64,
    image_size: u64,
    self_ctrl: bool,
    next_seq: u32,
    /// Images captured last epoch, stored at the start of this one.
    pending_store: Vec<DataUnit>,
    /// Capture carried over from the previous epoch.
    in_flight: Option<(DataUnit, SimTime)>,
}

impl ModelImagingLogicBased {
    pub fn new(cfg: &ImagingConfig) -> ModelImagingLogicBased {
        let cycle_s = if cfg.self_ctrl {
            cfg.time_to_image + cfg.imaging_interval
        } else {
            cfg.time_to_image
        };
        ModelImagingLogicBased {
            cycle_s: cycle_s.max(1e-9),
            capture_s: cfg.time_to_image.max(0.0),
            image_size: cfg.image_size,
            self_ctrl: cfg.self_ctrl,
            next_seq: 0,
            pending_store: Vec::new(),
            in_flight: None,
        }
    }

    fn new_image(&mut self, ctx: &ModelContext<'_>) -> DataUnit {
        let unit = DataUnit {
            id: DataUnit::compose_id(ctx.node_id(), self.next_seq),
            kind: DataKind::Image,
            size_bytes: self.image_size,
            created_at: ctx.now(),
            source_node: ctx.node_id(),
        };
        self.next_seq += 1;
        unit
    }

    fn image_possible(&self, ctx: &mut ModelContext<'_>) -> bool {
        let mut args = Kwargs::new();
        let sunlit = ctx
            .invoke_sibling_by_tag(ModelTag::Orbital, "in_sunlight", &mut args)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if !sunlit {
            return false;
        }
        let mut args = Kwargs::new().with("tag", "IMAGING");
        let powered = ctx
            .invoke_sibling_by_tag(ModelTag::Power, "has_energy", &mut args)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if !powered {
            return false;
        }
        if ctx.has_sibling_with_tag(ModelTag::Adacs) {
            let mut args = Kwargs::new();
            return ctx
                .invoke_sibling_by_tag(ModelTag::Adacs, "is_on", &mut args)
                .map(|v| v.is_truthy())
                .unwrap_or(false);
        }
        true
    }

    /// Capture one image now: bill the energy, log, and queue for storage.
    fn capture(&mut self, ctx: &mut ModelContext<'_>) -> Option<DataUnit> {
        let mut args = Kwargs::new()
            .with("tag", "IMAGING")
            .with("duration", self.capture_s);
        let consumed = ctx
            .invoke_sibling_by_tag(ModelTag::Power, "consume_energy", &mut args)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if !consumed {
            return None;
        }
        let unit = self.new_image(ctx);
        ctx.logger().event(
            ctx.now(),
            EventKind::ImageTaken,
            json!({ "image_id": unit.id, "size_bytes": unit.size_bytes }),
        );
        Some(unit)
    }

    fn store_pending(&mut self, ctx: &mut ModelContext<'_>) {
        for unit in std::mem::take(&mut self.pending_store) {
            let id = unit.id;
            let mut args = Kwargs::new().with("data", unit);
            let stored = ctx
                .invoke_sibling_by_tag(ModelTag::DataStore, "add_data", &mut args)
                .map(|v| v.is_truthy())
                .unwrap_or(false);
            if !stored {
                log::debug!("node {}: datastore refused image {id}", ctx.node_id());
            }
        }
    }
}

impl Model for ModelImagingLogicBased {
    fn class_name(&self) -> &'static str {
        "ModelImagingLogicBased"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Imaging
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        self.store_pending(ctx);
        if !self.self_ctrl {
            return;
        }

        let mut available_s = ctx.delta_secs();
        if let Some((unit, done_at)) = self.in_flight.take() {
            if done_at <= ctx.now() + ctx.delta() {
                available_s -= done_at.seconds_since(ctx.now()).min(available_s);
                self.pending_store.push(unit);
            } else {
                self.in_flight = Some((unit, done_at));
                return;
            }
        }

        if available_s <= 0.0 || !self.image_possible(ctx) {
            return;
        }

        let whole = (available_s / self.cycle_s).floor() as usize;
        for _ in 0..whole {
            match self.capture(ctx) {
                Some(unit) => self.pending_store.push(unit),
                None => return,
            }
        }
        let leftover_s = available_s - whole as f64 * self.cycle_s;
        if leftover_s > 0.0 {
            if let Some(unit) = self.capture(ctx) {
                let remaining = self.cycle_s - leftover_s;
                let done_at = ctx.now() + ctx.delta() + SimTime::from_secs(remaining);
                self.in_flight = Some((unit, done_at));
            }
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        _args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "check_image_possible" => Ok(Value::Bool(self.image_possible(ctx))),
            "take_image" => {
                if !self.image_possible(ctx) {
                    return Ok(Value::Bool(false));
                }
                match self.capture(ctx) {
                    Some(unit) => {
                        self.pending_store.push(unit);
                        Ok(Value::Bool(true))
                    }
                    None => Ok(Value::Bool(false)),
                }
            }
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}

//! Battery/solar power model (tag `POWER`).
//!
//! Energy is tracked in joules. Each epoch: solar generation gated by the
//! orbital sibling's sunlight predicate, clamped to capacity, then the
//! always-on drains. `consume_energy` never takes the battery below
//! `MIN_CAPACITY`; `has_energy` is the non-mutating gate schedulers use
//! before expensive operations.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::json;

use orbsim_common::{
    EventKind, InvocationError, Kwargs, Model, ModelContext, ModelTag, Value,
};

use crate::ModelConfigError;

/// Capacity bounds in joules.
#[derive(Debug, Clone, Deserialize)]
pub struct PowerCapacities {
    #[serde(rename = "MAX_CAPACITY")]
    pub max_capacity: f64,
    #[serde(rename = "MIN_CAPACITY")]
    pub min_capacity: f64,
    #[serde(rename = "INITIAL_CAPACITY")]
    pub initial_capacity: f64,
}

/// Scenario configuration of the power model.
#[derive(Debug, Clone, Deserialize)]
pub struct PowerConfig {
    /// Watts drawn per consumption tag.
    pub power_consumption: BTreeMap<String, f64>,
    pub power_configurations: PowerCapacities,
    /// Watts generated per source; `SOLAR` is required.
    pub power_generations: BTreeMap<String, f64>,
    /// Battery/panel efficiency in (0, 1].
    #[serde(default = "default_efficiency")]
    pub efficiency: f64,
    /// Tags drained every epoch regardless of requests.
    #[serde(default)]
    pub always_on: Vec<String>,
    /// Per-tag minimum energy for `has_energy` grants.
    #[serde(default)]
    pub required_energy: BTreeMap<String, f64>,
}

fn default_efficiency() -> f64 {
    1.0
}

/// Joule-tracked battery with tag-based draws (tag `POWER`).
pub struct ModelPower {
    consumption_w: BTreeMap<String, f64>,
    required_j: BTreeMap<String, f64>,
    always_on: Vec<String>,
    solar_w: f64,
    efficiency: f64,
    max_j: f64,
    min_j: f64,
    current_j: f64,
    /// Tags warned about once when absent from the rate tables.
    warned_tags: BTreeSet<String>,
    // Per-epoch stats for the energy-consumed record.
    generated_this_epoch: f64,
    consumed_this_epoch: BTreeMap<String, f64>,
    out_of_power: bool,
}

impl ModelPower {
    pub fn new(cfg: PowerConfig) -> Result<ModelPower, ModelConfigError> {
        let caps = &cfg.power_configurations;
        if !(caps.min_capacity <= caps.initial_capacity
            && caps.initial_capacity <= caps.max_capacity)
        {
            return Err(ModelConfigError::new(
                "ModelPower",
                format!(
                    "capacities must satisfy MIN <= INITIAL <= MAX, got {}/{}/{}",
                    caps.min_capacity, caps.initial_capacity, caps.max_capacity
                ),
            ));
        }
        let solar_w = *cfg.power_generations.get("SOLAR").ok_or_else(|| {
            ModelConfigError::new("ModelPower", "power_generations requires a SOLAR entry")
        })?;
        if !(0.0..=1.0).contains(&cfg.efficiency) || cfg.efficiency == 0.0 {
            return Err(ModelConfigError::new(
                "ModelPower",
                format!("efficiency {} outside (0, 1]", cfg.efficiency),
            ));
        }
        Ok(ModelPower {
            consumption_w: cfg.power_consumption,
            required_j: cfg.required_energy,
            always_on: cfg.always_on,
            solar_w,
            efficiency: cfg.efficiency,
            max_j: caps.max_capacity,
            min_j: caps.min_capacity,
            current_j: caps.initial_capacity,
            warned_tags: BTreeSet::new(),
            generated_this_epoch: 0.0,
            consumed_this_epoch: BTreeMap::new(),
            out_of_power: false,
        })
    }

    pub fn available_j(&self) -> f64 {
        self.current_j
    }

    fn warn_once(&mut self, table: &str, tag: &str) {
        if self.warned_tags.insert(format!("{table}:{tag}")) {
            log::warn!("power tag {tag:?} not in {table}; assuming zero");
        }
    }

    /// Draw joules respecting the minimum floor. Returns whether the draw
    /// happened; a denied draw mutates nothing.
    fn draw(&mut self, tag: &str, energy_j: f64) -> bool {
        if self.current_j >= energy_j + self.min_j {
            self.current_j -= energy_j;
            *self
                .consumed_this_epoch
                .entry(tag.to_string())
                .or_insert(0.0) += energy_j;
            true
        } else {
            false
        }
    }

    fn consume_energy(&mut self, args: &mut Kwargs) -> Result<Value, InvocationError> {
        const OP: &str = "consume_energy";
        let (tag, energy_j) = if let Some(e) = args.opt_f64(OP, "energy")? {
            ("direct".to_string(), e)
        } else if args.contains("power") {
            let power = args.require_f64(OP, "power")?;
            let duration = args.require_f64(OP, "duration")?;
            ("direct".to_string(), power * duration)
        } else {
            let tag = args.require_str(OP, "tag")?.to_string();
            let duration = args.require_f64(OP, "duration")?;
            let watts = match self.consumption_w.get(&tag) {
                Some(w) => *w,
                None => {
                    self.warn_once("power_consumption", &tag);
                    0.0
                }
            };
            (tag, watts * duration)
        };
        Ok(Value::Bool(self.draw(&tag, energy_j)))
    }

    fn has_energy(&mut self, args: &mut Kwargs) -> Result<Value, InvocationError> {
        let tag = args.require_str("has_energy", "tag")?.to_string();
        let granted = match self.required_j.get(&tag) {
            Some(required) => self.current_j >= *required,
            None => {
                self.warn_once("required_energy", &tag);
                self.current_j > self.min_j
            }
        };
        Ok(Value::Bool(granted))
    }
}

impl Model for ModelPower {
    fn class_name(&self) -> &'static str {
        "ModelPower"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Power
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        let delta = ctx.delta_secs();

        let mut args = Kwargs::new();
        let sunlit = ctx
            .invoke_sibling_by_tag(ModelTag::Orbital, "in_sunlight", &mut args)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        let before = self.current_j;
        if sunlit {
            self.current_j =
                (self.current_j + self.solar_w * delta * self.efficiency).min(self.max_j);
        }
        self.generated_this_epoch = self.current_j - before;

        self.out_of_power = false;
        let always_on = self.always_on.clone();
        for tag in &always_on {
            let watts = match self.consumption_w.get(tag) {
                Some(w) => *w,
                None => {
                    self.warn_once("power_consumption", tag);
                    0.0
                }
            };
            if !self.draw(tag, watts * delta) {
                self.out_of_power = true;
            }
        }

        ctx.logger().event(
            ctx.now(),
            EventKind::EnergyConsumed,
            json!({
                "current_charge_j": self.current_j,
                "generated_j": self.generated_this_epoch,
                "sunlit": sunlit,
                "out_of_power": self.out_of_power,
                "consumed_j": self.consumed_this_epoch,
            }),
        );
        self.consumed_this_epoch.clear();
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        _ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "consume_energy" => self.consume_energy(args),
            "has_energy" => self.has_energy(args),
            "get_available_energy" => Ok(Value::Float(self.current_j)),
            "get_min_charge" => Ok(Value::Float(self.min_j)),
            "get_max_charge" => Ok(Value::Float(self.max_j)),
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: f64, min: f64, max: f64) -> PowerConfig {
        PowerConfig {
            power_consumption: BTreeMap::from([
                ("TXRADIO".to_string(), 10.0),
                ("RXRADIO".to_string(), 0.133),
                ("HEATER".to_string(), 0.5),
            ]),
            power_configurations: PowerCapacities {
                max_capacity: max,
                min_capacity: min,
                initial_capacity: initial,
            },
            power_generations: BTreeMap::from([("SOLAR".to_string(), 1.5)]),
            efficiency: 1.0,
            always_on: Vec::new(),
            required_energy: BTreeMap::from([("TXRADIO".to_string(), 120.0)]),
        }
    }

    fn consume(model: &mut ModelPower, args: Kwargs) -> bool {
        let mut args = args;
        model
            .consume_energy(&mut args)
            .unwrap()
            .as_bool()
            .unwrap()
    }

    #[test]
    fn three_input_forms_draw_the_same_energy() {
        let mut model = ModelPower::new(config(1_000.0, 0.0, 2_000.0)).unwrap();
        assert!(consume(&mut model, Kwargs::new().with("energy", 50.0)));
        assert!((model.available_j() - 950.0).abs() < 1e-9);

        assert!(consume(
            &mut model,
            Kwargs::new().with("power", 10.0).with("duration", 5.0)
        ));
        assert!((model.available_j() - 900.0).abs() < 1e-9);

        assert!(consume(
            &mut model,
            Kwargs::new().with("tag", "TXRADIO").with("duration", 5.0)
        ));
        assert!((model.available_j() - 850.0).abs() < 1e-9);
    }

    #[test]
    fn denial_below_minimum_mutates_nothing() {
        let mut model = ModelPower::new(config(105.0, 100.0, 2_000.0)).unwrap();
        // 5 J of headroom: a 10 J draw must be denied untouched.
        assert!(!consume(&mut model, Kwargs::new().with("energy", 10.0)));
        assert!((model.available_j() - 105.0).abs() < 1e-9);
        // A 5 J draw exactly reaches the floor.
        assert!(consume(&mut model, Kwargs::new().with("energy", 5.0)));
        assert!((model.available_j() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn has_energy_denial_implies_consume_denial() {
        let mut model = ModelPower::new(config(105.0, 100.0, 2_000.0)).unwrap();
        // TXRADIO requires 120 J, only 105 available.
        let mut args = Kwargs::new().with("tag", "TXRADIO");
        assert!(!model.has_energy(&mut args).unwrap().as_bool().unwrap());
        // And the corresponding tag draw for a full second is denied too.
        assert!(!consume(
            &mut model,
            Kwargs::new().with("tag", "TXRADIO").with("duration", 1.0)
        ));
    }

    #[test]
    fn unknown_tag_draws_zero() {
        let mut model = ModelPower::new(config(1_000.0, 0.0, 2_000.0)).unwrap();
        assert!(consume(
            &mut model,
            Kwargs::new().with("tag", "GPS").with("duration", 10.0)
        ));
        assert!((model.available_j() - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn config_validation() {
        let mut bad = config(10.0, 100.0, 2_000.0);
        assert!(ModelPower::new(bad.clone()).is_err());
        bad = config(1_000.0, 0.0, 2_000.0);
        bad.power_generations.clear();
        assert!(ModelPower::new(bad.clone()).is_err());
        bad = config(1_000.0, 0.0, 2_000.0);
        bad.efficiency = 1.5;
        assert!(ModelPower::new(bad).is_err());
    }
}

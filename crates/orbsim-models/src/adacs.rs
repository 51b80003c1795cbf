//! Attitude determination and control model (tag `ADACS`).
//!
//! Runs whenever the satellite is sunlit and the power model grants the
//! `ADACS` tag; consumes its energy for the epoch and reports its state
//! through `is_on` for the imaging logic.

use orbsim_common::{InvocationError, Kwargs, Model, ModelContext, ModelTag, Value};

/// Sunlight- and power-gated attitude control (tag `ADACS`).
#[derive(Default)]
pub struct ModelAdacs {
    is_on: bool,
}

impl ModelAdacs {
    pub fn new() -> ModelAdacs {
        ModelAdacs::default()
    }
}

impl Model for ModelAdacs {
    fn class_name(&self) -> &'static str {
        "ModelAdacs"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Adacs
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        let mut args = Kwargs::new();
        let sunlit = ctx
            .invoke_sibling_by_tag(ModelTag::Orbital, "in_sunlight", &mut args)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if !sunlit {
            self.is_on = false;
            return;
        }
        let mut args = Kwargs::new().with("tag", "ADACS");
        let granted = ctx
            .invoke_sibling_by_tag(ModelTag::Power, "has_energy", &mut args)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if granted {
            let mut args = Kwargs::new()
                .with("tag", "ADACS")
                .with("duration", ctx.delta_secs());
            let _ = ctx.invoke_sibling_by_tag(ModelTag::Power, "consume_energy", &mut args);
            self.is_on = true;
        } else {
            self.is_on = false;
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        _args: &mut Kwargs,
        _ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "is_on" => Ok(Value::Bool(self.is_on)),
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}

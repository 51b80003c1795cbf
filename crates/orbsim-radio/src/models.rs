//! Concrete radio models.
//!
//! Each class composes the shared [`RadioCore`] and pins down the radio
//! class, its tag, and class-specific defaults. The downlink and aggregator
//! variants carry distinct class names so a satellite's MACs can address
//! each of its LoRa radios without guessing; their behavior is plain
//! `RadioCore`.

use orbsim_common::{
    InvocationError, Kwargs, Model, ModelContext, ModelTag, NodeId, RadioClass, RadioPort, Value,
};

use crate::core::{RadioConfig, RadioCore};

/// Narrowband LoRa radio (tag `BASICLORARADIO`).
pub struct ModelLoraRadio {
    core: RadioCore,
}

impl ModelLoraRadio {
    pub fn new(cfg: RadioConfig, owner: NodeId) -> ModelLoraRadio {
        ModelLoraRadio {
            core: RadioCore::new(RadioClass::Lora, cfg, owner),
        }
    }
}

impl Model for ModelLoraRadio {
    fn class_name(&self) -> &'static str {
        "ModelLoraRadio"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::BasicLoraRadio
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        self.core.advance(ctx);
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        self.core.invoke(self.class_name(), op, args, ctx)
    }

    fn as_radio_port(&self) -> Option<&RadioPort> {
        Some(self.core.port())
    }

    fn as_radio_port_mut(&mut self) -> Option<&mut RadioPort> {
        Some(self.core.port_mut())
    }
}

/// Satellite downlink LoRa radio (tag `BASICLORARADIO`).
///
/// Behaviorally identical to [`ModelLoraRadio`]; the distinct class name
/// lets a satellite carry both a downlink and an aggregator radio and lets
/// its MACs address each by class.
pub struct ModelDownlinkRadio {
    core: RadioCore,
}

impl ModelDownlinkRadio {
    pub fn new(cfg: RadioConfig, owner: NodeId) -> ModelDownlinkRadio {
        ModelDownlinkRadio {
            core: RadioCore::new(RadioClass::Lora, cfg, owner),
        }
    }
}

impl Model for ModelDownlinkRadio {
    fn class_name(&self) -> &'static str {
        "ModelDownlinkRadio"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::BasicLoraRadio
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        self.core.advance(ctx);
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        self.core.invoke(self.class_name(), op, args, ctx)
    }

    fn as_radio_port(&self) -> Option<&RadioPort> {
        Some(self.core.port())
    }

    fn as_radio_port_mut(&mut self) -> Option<&mut RadioPort> {
        Some(self.core.port_mut())
    }
}

/// Satellite uplink-aggregation LoRa radio (tag `BASICLORARADIO`).
pub struct ModelAggregatorRadio {
    core: RadioCore,
}

impl ModelAggregatorRadio {
    pub fn new(cfg: RadioConfig, owner: NodeId) -> ModelAggregatorRadio {
        ModelAggregatorRadio {
            core: RadioCore::new(RadioClass::Lora, cfg, owner),
        }
    }
}

impl Model for ModelAggregatorRadio {
    fn class_name(&self) -> &'static str {
        "ModelAggregatorRadio"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::BasicLoraRadio
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        self.core.advance(ctx);
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        self.core.invoke(self.class_name(), op, args, ctx)
    }

    fn as_radio_port(&self) -> Option<&RadioPort> {
        Some(self.core.port())
    }

    fn as_radio_port_mut(&mut self) -> Option<&mut RadioPort> {
        Some(self.core.port_mut())
    }
}

/// Wideband X-band imaging radio (tag `IMAGINGRADIO`).
///
/// `num_channels` parallel streams per epoch; collisions still apply per
/// frequency across transmitters.
pub struct ModelImagingRadio {
    core: RadioCore,
}

impl ModelImagingRadio {
    pub fn new(mut cfg: RadioConfig, owner: NodeId) -> ModelImagingRadio {
        if cfg.num_channels == 0 {
            cfg.num_channels = 1;
        }
        ModelImagingRadio {
            core: RadioCore::new(RadioClass::Xband, cfg, owner),
        }
    }
}

impl Model for ModelImagingRadio {
    fn class_name(&self) -> &'static str {
        "ModelImagingRadio"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::ImagingRadio
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        self.core.advance(ctx);
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        self.core.invoke(self.class_name(), op, args, ctx)
    }

    fn as_radio_port(&self) -> Option<&RadioPort> {
        Some(self.core.port())
    }

    fn as_radio_port_mut(&mut self) -> Option<&mut RadioPort> {
        Some(self.core.port_mut())
    }
}

/// Inter-satellite link radio (tag `ISL`).
///
/// Candidates come from the declared peer list instead of a FoV model, and
/// the transmit queue is externally driven by default.
pub struct ModelIslRadio {
    core: RadioCore,
}

impl ModelIslRadio {
    pub fn new(cfg: RadioConfig, owner: NodeId) -> ModelIslRadio {
        ModelIslRadio {
            core: RadioCore::new(RadioClass::Isl, cfg, owner),
        }
    }
}

impl Model for ModelIslRadio {
    fn class_name(&self) -> &'static str {
        "ModelIslRadio"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Isl
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        self.core.advance(ctx);
    }

    fn invoke(
        &mut self,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        self.core.invoke(self.class_name(), op, args, ctx)
    }

    fn as_radio_port(&self) -> Option<&RadioPort> {
        Some(self.core.port())
    }

    fn as_radio_port_mut(&mut self) -> Option<&mut RadioPort> {
        Some(self.core.port_mut())
    }
}

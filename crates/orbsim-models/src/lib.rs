//! # orbsim-models
//!
//! The behavior models that populate orbsim nodes: orbital propagation,
//! field-of-view, power, data storage and generation, the MAC state
//! machines, onboard compute, imaging, and attitude control.
//!
//! Every model composes the kernel's [`Model`](orbsim_common::Model)
//! contract: a named-operation surface plus a per-epoch `advance`. Model
//! constructors take a deserialized config struct; the orchestrator's
//! factories parse the scenario attribute bags into those structs.

pub mod adacs;
pub mod compute;
pub mod datastore;
pub mod fov;
pub mod imaging;
pub mod mac;
pub mod orbit;
pub mod power;

pub use adacs::ModelAdacs;
pub use compute::{ComputeConfig, ModelCompute};
pub use datastore::{
    DataGeneratorConfig, DataStoreConfig, ModelDataGenerator, ModelDataRelay, ModelDataStore,
};
pub use fov::{FovConfig, ModelFovElevation, ModelFovPassTable};
pub use imaging::{ImagingConfig, ModelImagingLogicBased};
pub use mac::{
    GsMacConfig, IotMacConfig, MacAggregatorConfig, ModelMacAggregator, ModelMacGs, ModelMacIot,
    ModelMacTtnc, TtncMacConfig,
};
pub use orbit::{FixedOrbitConfig, ModelFixedOrbit, ModelOrbit, ModelOrbitOneFullUpdate};
pub use power::{ModelPower, PowerConfig};

use thiserror::Error;

/// A model rejected its configuration at build time.
#[derive(Debug, Error)]
#[error("{model}: {reason}")]
pub struct ModelConfigError {
    pub model: &'static str,
    pub reason: String,
}

impl ModelConfigError {
    pub fn new(model: &'static str, reason: impl Into<String>) -> ModelConfigError {
        ModelConfigError {
            model,
            reason: reason.into(),
        }
    }
}

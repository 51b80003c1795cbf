//! Capability registry.
//!
//! Two name-to-spec maps, one for node classes and one for model classes.
//! A model spec records its capability tag, supported owner classes (empty
//! means any), its dependency expression in conjunctive normal form (AND
//! of OR-sublists), and a factory taking the parsed attribute bag. The
//! registry is built once at startup and never instantiates anything
//! itself.

use std::collections::HashMap;

use orbsim_common::{Model, ModelTag, NodeId, NodeKind};
use orbsim_models::{
    ComputeConfig, DataGeneratorConfig, DataStoreConfig, FixedOrbitConfig, FovConfig, GsMacConfig,
    ImagingConfig, IotMacConfig, MacAggregatorConfig, ModelAdacs, ModelCompute, ModelDataGenerator,
    ModelDataRelay, ModelDataStore, ModelFixedOrbit, ModelFovElevation, ModelFovPassTable,
    ModelImagingLogicBased, ModelMacAggregator, ModelMacGs, ModelMacIot, ModelMacTtnc, ModelOrbit,
    ModelOrbitOneFullUpdate, ModelPower, PowerConfig, TtncMacConfig,
};
use orbsim_radio::{
    ModelAggregatorRadio, ModelDownlinkRadio, ModelImagingRadio, ModelIslRadio, ModelLoraRadio,
    RadioConfig,
};

use crate::error::ConfigError;

/// Everything a model factory may need from its surroundings.
pub struct ModelBuildCtx<'a> {
    pub node_id: NodeId,
    pub node_kind: NodeKind,
    pub node_class: &'a str,
    /// The model's own attribute bag, verbatim from the scenario.
    pub config: &'a serde_json::Map<String, serde_json::Value>,
    /// The owning node's class-specific attributes (TLE lines, position).
    pub node_extra: &'a serde_json::Map<String, serde_json::Value>,
}

impl ModelBuildCtx<'_> {
    /// Deserialize the model's attribute bag, ignoring unknown keys.
    pub fn parse<T: serde::de::DeserializeOwned>(
        &self,
        model: &'static str,
    ) -> Result<T, ConfigError> {
        serde_json::from_value(serde_json::Value::Object(self.config.clone())).map_err(|e| {
            ConfigError::BadModelConfig {
                node: self.node_id,
                model: model.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// A required string from the owning node's attributes.
    pub fn node_str(&self, model: &'static str, key: &str) -> Result<&str, ConfigError> {
        self.node_extra
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConfigError::BadModelConfig {
                node: self.node_id,
                model: model.to_string(),
                reason: format!("owner node is missing {key:?}"),
            })
    }

    fn bad(&self, model: &'static str, reason: impl ToString) -> ConfigError {
        ConfigError::BadModelConfig {
            node: self.node_id,
            model: model.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type ModelFactory = fn(&ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError>;

/// Registry entry for a model class.
pub struct ModelClassSpec {
    pub name: &'static str,
    pub tag: ModelTag,
    /// Owner-class filter; empty means any node class.
    pub supported_node_classes: &'static [&'static str],
    /// CNF dependency expression over sibling class names.
    pub dependencies: &'static [&'static [&'static str]],
    pub factory: ModelFactory,
}

/// Registry entry for a node class.
pub struct NodeClassSpec {
    pub name: &'static str,
    pub kind: NodeKind,
}

/// Name-to-factory maps for node and model classes.
pub struct Registry {
    nodes: HashMap<&'static str, NodeClassSpec>,
    models: HashMap<&'static str, ModelClassSpec>,
}

const ORBITALS: &[&str] = &["ModelFixedOrbit", "ModelOrbit", "ModelOrbitOneFullUpdate"];
const LORA_RADIOS: &[&str] = &[
    "ModelLoraRadio",
    "ModelDownlinkRadio",
    "ModelAggregatorRadio",
];
const FOVS: &[&str] = &["ModelFovElevation", "ModelFovPassTable"];

// Factory helpers, one per concrete class.

fn build_orbit(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let tle_1 = ctx.node_str("ModelOrbit", "tle_1")?;
    let tle_2 = ctx.node_str("ModelOrbit", "tle_2")?;
    ModelOrbit::new(tle_1, tle_2)
        .map(|m| Box::new(m) as Box<dyn Model>)
        .map_err(|e| ctx.bad("ModelOrbit", e))
}

fn build_orbit_bulk(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let tle_1 = ctx.node_str("ModelOrbitOneFullUpdate", "tle_1")?;
    let tle_2 = ctx.node_str("ModelOrbitOneFullUpdate", "tle_2")?;
    ModelOrbitOneFullUpdate::new(tle_1, tle_2)
        .map(|m| Box::new(m) as Box<dyn Model>)
        .map_err(|e| ctx.bad("ModelOrbitOneFullUpdate", e))
}

fn build_fixed_orbit(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: FixedOrbitConfig = ctx.parse("ModelFixedOrbit")?;
    ModelFixedOrbit::new(&cfg)
        .map(|m| Box::new(m) as Box<dyn Model>)
        .map_err(|e| ctx.bad("ModelFixedOrbit", e))
}

fn build_fov_elevation(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: FovConfig = ctx.parse("ModelFovElevation")?;
    Ok(Box::new(ModelFovElevation::new(&cfg)))
}

fn build_fov_pass_table(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: FovConfig = ctx.parse("ModelFovPassTable")?;
    Ok(Box::new(ModelFovPassTable::new(&cfg)))
}

fn build_power(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: PowerConfig = ctx.parse("ModelPower")?;
    ModelPower::new(cfg)
        .map(|m| Box::new(m) as Box<dyn Model>)
        .map_err(|e| ctx.bad("ModelPower", e))
}

fn build_lora_radio(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: RadioConfig = ctx.parse("ModelLoraRadio")?;
    Ok(Box::new(ModelLoraRadio::new(cfg, ctx.node_id)))
}

fn build_downlink_radio(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: RadioConfig = ctx.parse("ModelDownlinkRadio")?;
    Ok(Box::new(ModelDownlinkRadio::new(cfg, ctx.node_id)))
}

fn build_aggregator_radio(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: RadioConfig = ctx.parse("ModelAggregatorRadio")?;
    Ok(Box::new(ModelAggregatorRadio::new(cfg, ctx.node_id)))
}

fn build_imaging_radio(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: RadioConfig = ctx.parse("ModelImagingRadio")?;
    Ok(Box::new(ModelImagingRadio::new(cfg, ctx.node_id)))
}

fn build_isl_radio(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: RadioConfig = ctx.parse("ModelIslRadio")?;
    Ok(Box::new(ModelIslRadio::new(cfg, ctx.node_id)))
}

fn build_datastore(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: DataStoreConfig = ctx.parse("ModelDataStore")?;
    Ok(Box::new(ModelDataStore::new(&cfg)))
}

fn build_data_generator(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: DataGeneratorConfig = ctx.parse("ModelDataGenerator")?;
    Ok(Box::new(ModelDataGenerator::new(&cfg)))
}

fn build_data_relay(_ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    Ok(Box::new(ModelDataRelay::new()))
}

fn build_mac_ttnc(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: TtncMacConfig = ctx.parse("ModelMacTtnc")?;
    Ok(Box::new(ModelMacTtnc::new(cfg)))
}

fn build_mac_gs(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: GsMacConfig = ctx.parse("ModelMacGs")?;
    Ok(Box::new(ModelMacGs::new(cfg)))
}

fn build_mac_iot(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: IotMacConfig = ctx.parse("ModelMacIot")?;
    Ok(Box::new(ModelMacIot::new(cfg)))
}

fn build_mac_aggregator(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: MacAggregatorConfig = ctx.parse("ModelMacAggregator")?;
    Ok(Box::new(ModelMacAggregator::new(cfg)))
}

fn build_compute(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: ComputeConfig = ctx.parse("ModelCompute")?;
    Ok(Box::new(ModelCompute::new(&cfg)))
}

fn build_imaging(ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    let cfg: ImagingConfig = ctx.parse("ModelImagingLogicBased")?;
    Ok(Box::new(ModelImagingLogicBased::new(&cfg)))
}

fn build_adacs(_ctx: &ModelBuildCtx<'_>) -> Result<Box<dyn Model>, ConfigError> {
    Ok(Box::new(ModelAdacs::new()))
}

impl Registry {
    /// The built-in class registry. Called once at startup.
    pub fn builtin() -> Registry {
        let mut nodes = HashMap::new();
        for spec in [
            NodeClassSpec {
                name: "SatelliteBasic",
                kind: NodeKind::Sat,
            },
            NodeClassSpec {
                name: "GroundStationBasic",
                kind: NodeKind::Gs,
            },
            NodeClassSpec {
                name: "IotBasic",
                kind: NodeKind::IotDevice,
            },
        ] {
            nodes.insert(spec.name, spec);
        }

        let mut models = HashMap::new();
        let specs = [
            ModelClassSpec {
                name: "ModelOrbit",
                tag: ModelTag::Orbital,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[],
                factory: build_orbit,
            },
            ModelClassSpec {
                name: "ModelOrbitOneFullUpdate",
                tag: ModelTag::Orbital,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[],
                factory: build_orbit_bulk,
            },
            ModelClassSpec {
                name: "ModelFixedOrbit",
                tag: ModelTag::Orbital,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[],
                factory: build_fixed_orbit,
            },
            ModelClassSpec {
                name: "ModelFovElevation",
                tag: ModelTag::ViewOfNode,
                supported_node_classes: &[],
                dependencies: &[],
                factory: build_fov_elevation,
            },
            ModelClassSpec {
                name: "ModelFovPassTable",
                tag: ModelTag::ViewOfNode,
                supported_node_classes: &[],
                dependencies: &[],
                factory: build_fov_pass_table,
            },
            ModelClassSpec {
                name: "ModelPower",
                tag: ModelTag::Power,
                supported_node_classes: &[],
                dependencies: &[ORBITALS],
                factory: build_power,
            },
            ModelClassSpec {
                name: "ModelLoraRadio",
                tag: ModelTag::BasicLoraRadio,
                supported_node_classes: &[],
                dependencies: &[FOVS],
                factory: build_lora_radio,
            },
            ModelClassSpec {
                name: "ModelDownlinkRadio",
                tag: ModelTag::BasicLoraRadio,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[FOVS],
                factory: build_downlink_radio,
            },
            ModelClassSpec {
                name: "ModelAggregatorRadio",
                tag: ModelTag::BasicLoraRadio,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[FOVS],
                factory: build_aggregator_radio,
            },
            ModelClassSpec {
                name: "ModelImagingRadio",
                tag: ModelTag::ImagingRadio,
                supported_node_classes: &[],
                dependencies: &[FOVS],
                factory: build_imaging_radio,
            },
            ModelClassSpec {
                name: "ModelIslRadio",
                tag: ModelTag::Isl,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[],
                factory: build_isl_radio,
            },
            ModelClassSpec {
                name: "ModelDataStore",
                tag: ModelTag::DataStore,
                supported_node_classes: &[],
                dependencies: &[],
                factory: build_datastore,
            },
            ModelClassSpec {
                name: "ModelDataGenerator",
                tag: ModelTag::DataGenerator,
                supported_node_classes: &[],
                dependencies: &[],
                factory: build_data_generator,
            },
            ModelClassSpec {
                name: "ModelDataRelay",
                tag: ModelTag::DataStore,
                supported_node_classes: &[],
                dependencies: &[&["ModelImagingRadio"]],
                factory: build_data_relay,
            },
            ModelClassSpec {
                name: "ModelMacTtnc",
                tag: ModelTag::Mac,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[LORA_RADIOS, &["ModelDataStore"]],
                factory: build_mac_ttnc,
            },
            ModelClassSpec {
                name: "ModelMacGs",
                tag: ModelTag::Mac,
                supported_node_classes: &["GroundStationBasic"],
                dependencies: &[LORA_RADIOS, &["ModelDataStore"]],
                factory: build_mac_gs,
            },
            ModelClassSpec {
                name: "ModelMacIot",
                tag: ModelTag::Mac,
                supported_node_classes: &["IotBasic"],
                dependencies: &[LORA_RADIOS, &["ModelDataGenerator"]],
                factory: build_mac_iot,
            },
            ModelClassSpec {
                name: "ModelMacAggregator",
                tag: ModelTag::Mac,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[LORA_RADIOS, &["ModelDataStore"]],
                factory: build_mac_aggregator,
            },
            ModelClassSpec {
                name: "ModelCompute",
                tag: ModelTag::Compute,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[&["ModelPower"]],
                factory: build_compute,
            },
            ModelClassSpec {
                name: "ModelImagingLogicBased",
                tag: ModelTag::Imaging,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[ORBITALS, &["ModelPower"], &["ModelDataStore"]],
                factory: build_imaging,
            },
            ModelClassSpec {
                name: "ModelAdacs",
                tag: ModelTag::Adacs,
                supported_node_classes: &["SatelliteBasic"],
                dependencies: &[ORBITALS, &["ModelPower"]],
                factory: build_adacs,
            },
        ];
        for spec in specs {
            models.insert(spec.name, spec);
        }

        Registry { nodes, models }
    }

    pub fn node_class(&self, name: &str) -> Result<&NodeClassSpec, ConfigError> {
        self.nodes
            .get(name)
            .ok_or_else(|| ConfigError::UnknownNodeClass {
                name: name.to_string(),
            })
    }

    pub fn model_class(&self, name: &str) -> Result<&ModelClassSpec, ConfigError> {
        self.models
            .get(name)
            .ok_or_else(|| ConfigError::UnknownModelClass {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_resolves_known_classes() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.node_class("SatelliteBasic").unwrap().kind,
            NodeKind::Sat
        );
        let power = registry.model_class("ModelPower").unwrap();
        assert_eq!(power.tag, ModelTag::Power);
        assert_eq!(power.dependencies.len(), 1);
        assert_eq!(power.dependencies[0], ORBITALS);
    }

    #[test]
    fn unknown_names_are_structured_errors() {
        let registry = Registry::builtin();
        assert!(matches!(
            registry.node_class("CubeSatDeluxe"),
            Err(ConfigError::UnknownNodeClass { .. })
        ));
        assert!(matches!(
            registry.model_class("ModelWarpDrive"),
            Err(ConfigError::UnknownModelClass { .. })
        ));
    }

    #[test]
    fn factories_reject_bad_bags() {
        let registry = Registry::builtin();
        let spec = registry.model_class("ModelPower").unwrap();
        let empty = serde_json::Map::new();
        let ctx = ModelBuildCtx {
            node_id: NodeId(1),
            node_kind: NodeKind::Sat,
            node_class: "SatelliteBasic",
            config: &empty,
            node_extra: &empty,
        };
        assert!(matches!(
            (spec.factory)(&ctx),
            Err(ConfigError::BadModelConfig { .. })
        ));
    }
}

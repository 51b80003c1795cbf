//! Scenario JSON schema.
//!
//! The document contract: `topologies[].nodes[].models[]`, a `simtime`
//! window, and a `simlogsetup` descriptor. Unknown keys at the node and
//! model level are captured via flatten and forwarded verbatim to the
//! corresponding factory.

use serde::Deserialize;

use orbsim_common::{LogLevel, NodeKind};

/// Root of a scenario document.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioDoc {
    pub topologies: Vec<TopologyDoc>,
    pub simtime: SimTimeDoc,
    pub simlogsetup: LogSetupDoc,
    /// Master RNG seed; per-node streams derive from it.
    #[serde(default)]
    pub seed: u64,
}

impl ScenarioDoc {
    /// Parse a scenario from its JSON text.
    pub fn from_json(text: &str) -> Result<ScenarioDoc, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Simulation-time window and epoch length.
#[derive(Debug, Clone, Deserialize)]
pub struct SimTimeDoc {
    /// `YYYY-MM-DD HH:MM:SS`, UTC.
    pub starttime: String,
    pub endtime: String,
    /// Epoch length in seconds.
    pub delta: f64,
}

/// Log-sink descriptor. Handler-specific keys ride in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSetupDoc {
    pub loghandler: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One topology: a named, uniquely identified group of nodes.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyDoc {
    pub name: String,
    pub id: u32,
    pub nodes: Vec<NodeDoc>,
}

/// One node declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDoc {
    pub nodeid: u32,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Node implementation class name.
    pub iname: String,
    #[serde(default)]
    pub loglevel: LogLevel,
    /// Optional node-specific window, defaulting to the scenario window.
    #[serde(default)]
    pub starttime: Option<String>,
    #[serde(default)]
    pub endtime: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelDoc>,
    /// Node-class-specific keys (TLE lines, geodetic position, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One model declaration: class name plus its verbatim attribute bag.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDoc {
    pub iname: String,
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_schema_with_unknown_model_keys() {
        let doc = ScenarioDoc::from_json(
            r#"{
                "topologies": [{
                    "name": "Constellation", "id": 0,
                    "nodes": [{
                        "nodeid": 1, "type": "SAT", "iname": "SatelliteBasic",
                        "loglevel": "info",
                        "tle_1": "1 ...", "tle_2": "2 ...",
                        "models": [
                            {"iname": "ModelOrbit"},
                            {"iname": "ModelPower", "custom_knob": 42}
                        ]
                    }]
                }],
                "simtime": {
                    "starttime": "2022-10-17 12:00:00",
                    "endtime": "2022-10-17 12:11:00",
                    "delta": 1.0
                },
                "simlogsetup": {"loghandler": "file", "logfolder": "/tmp/logs"},
                "seed": 7
            }"#,
        )
        .unwrap();
        assert_eq!(doc.seed, 7);
        let node = &doc.topologies[0].nodes[0];
        assert_eq!(node.kind, NodeKind::Sat);
        assert_eq!(node.extra["tle_1"], serde_json::json!("1 ..."));
        assert_eq!(node.models[1].config["custom_knob"], serde_json::json!(42));
        assert_eq!(
            doc.simlogsetup.extra["logfolder"],
            serde_json::json!("/tmp/logs")
        );
    }

    #[test]
    fn node_window_and_loglevel_default() {
        let node: NodeDoc = serde_json::from_str(
            r#"{"nodeid": 3, "type": "GS", "iname": "GroundStationBasic",
                "latitude": 0.0, "longitude": 0.0}"#,
        )
        .unwrap();
        assert_eq!(node.loglevel, LogLevel::Info);
        assert!(node.starttime.is_none());
        assert!(node.models.is_empty());
    }
}

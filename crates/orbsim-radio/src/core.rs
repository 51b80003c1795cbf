//! The shared radio substrate.
//!
//! Every concrete radio model composes a [`RadioCore`]: the port (queues +
//! phy), the transmit path (power gating, FoV candidate lookup, airtime
//! accounting, staging with the fabric), and the common operation table.
//! Concrete models only pin down the radio class and its defaults.

use serde::Deserialize;
use serde_json::json;

use orbsim_common::{
    DropReason, EventKind, InvocationError, Kwargs, MacFrame, ModelContext, ModelTag, NodeId,
    NodeKind, PhySetup, RadioClass, RadioId, RadioPort, SimTime, Transmission, Value,
};

use crate::budget::time_on_air;

/// Scenario-level configuration shared by all radio classes.
///
/// Unknown keys in the model's attribute bag are ignored here; they stay
/// available to whoever deserializes the bag next.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Radio id; defaults to the owner node id.
    pub radio_id: Option<u32>,
    /// Bound for both queues; zero means unbounded.
    pub queue_size: usize,
    /// Whether the radio drains its own transmit queue each epoch.
    /// Defaults per class (ISL radios default to externally driven).
    pub self_ctrl: Option<bool>,
    pub phy_setup: PhySetup,
    /// Node kinds the FoV query targets; defaults per owner kind.
    pub target_kinds: Option<Vec<NodeKind>>,
    /// Concurrent channels (X-band).
    pub num_channels: u32,
    /// Declared ISL peers.
    pub connected_nodes: Vec<u32>,
}

impl Default for RadioConfig {
    fn default() -> RadioConfig {
        RadioConfig {
            radio_id: None,
            queue_size: 0,
            self_ctrl: None,
            phy_setup: PhySetup::default(),
            target_kinds: None,
            num_channels: 1,
            connected_nodes: Vec::new(),
        }
    }
}

/// Kinds a radio targets when its scenario config does not say.
fn default_target_kinds(owner: NodeKind) -> Vec<NodeKind> {
    match owner {
        NodeKind::Sat => vec![NodeKind::Gs, NodeKind::IotDevice],
        NodeKind::Gs | NodeKind::IotDevice => vec![NodeKind::Sat],
    }
}

/// Queue, phy, and transmit-path state shared by every radio model.
pub struct RadioCore {
    port: RadioPort,
    self_ctrl: bool,
    target_kinds: Option<Vec<NodeKind>>,
    /// Receive path switch controlled through operations.
    rx_user_enabled: bool,
    /// End of the in-flight transmission (LoRa/ISL are half duplex and
    /// serial within an epoch).
    busy_until: SimTime,
    /// Frames sent this epoch (X-band channel accounting).
    sends_this_epoch: u32,
}

impl RadioCore {
    pub fn new(class: RadioClass, cfg: RadioConfig, owner: NodeId) -> RadioCore {
        let radio_id = RadioId(cfg.radio_id.unwrap_or(owner.0));
        let mut port = RadioPort::new(radio_id, class, cfg.phy_setup, cfg.queue_size);
        port.num_channels = cfg.num_channels.max(1);
        port.peers = cfg.connected_nodes.into_iter().map(NodeId).collect();
        let default_self_ctrl = class != RadioClass::Isl;
        RadioCore {
            port,
            self_ctrl: cfg.self_ctrl.unwrap_or(default_self_ctrl),
            target_kinds: cfg.target_kinds,
            rx_user_enabled: true,
            busy_until: SimTime::ZERO,
            sends_this_epoch: 0,
        }
    }

    pub fn port(&self) -> &RadioPort {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut RadioPort {
        &mut self.port
    }

    pub fn radio_id(&self) -> RadioId {
        self.port.radio_id
    }

    /// Per-epoch bookkeeping and the self-controlled transmit step.
    pub fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        self.port.begin_epoch();
        self.sends_this_epoch = 0;

        // Power-gate the receive path and bill receive energy while it is
        // up. The user switch is separate so a starved radio comes back
        // when the battery does.
        let mut rx_powered = true;
        if ctx.has_sibling_with_tag(ModelTag::Power) {
            let mut args = Kwargs::new().with("tag", "RXRADIO");
            rx_powered = ctx
                .invoke_sibling_by_tag(ModelTag::Power, "has_energy", &mut args)
                .map(|v| v.is_truthy())
                .unwrap_or(true);
            if rx_powered && self.rx_user_enabled {
                let mut args = Kwargs::new()
                    .with("tag", "RXRADIO")
                    .with("duration", ctx.delta_secs());
                let _ = ctx.invoke_sibling_by_tag(ModelTag::Power, "consume_energy", &mut args);
            }
        }
        self.port.rx_enabled = self.rx_user_enabled && rx_powered;

        if self.self_ctrl && self.can_transmit(ctx.now()) {
            if let Some(frame) = self.port.pop_tx() {
                self.send_frame(frame, ctx);
            }
        }
    }

    fn can_transmit(&self, now: SimTime) -> bool {
        match self.port.class {
            RadioClass::Lora | RadioClass::Isl => now >= self.busy_until,
            RadioClass::Xband => self.sends_this_epoch < self.port.num_channels,
        }
    }

    fn drop_tx(&self, ctx: &mut ModelContext<'_>, frame: &MacFrame, reason: DropReason) {
        ctx.logger().event(
            ctx.now(),
            EventKind::PacketDrop,
            json!({
                "radio_id": self.port.radio_id,
                "frame": frame.kind_label(),
                "reason": reason,
                "direction": "tx",
            }),
        );
        metrics::counter!("orbsim_radio_dropped_total", "direction" => "tx").increment(1);
    }

    /// Transmit one frame: power, candidates, energy, staging.
    /// Returns whether the frame went on air.
    pub fn send_frame(&mut self, frame: MacFrame, ctx: &mut ModelContext<'_>) -> bool {
        let now = ctx.now();
        if !self.can_transmit(now) {
            log::debug!(
                "node {} radio {} busy, frame {} not sent",
                ctx.node_id(),
                self.port.radio_id,
                frame.kind_label()
            );
            return false;
        }

        let has_power_model = ctx.has_sibling_with_tag(ModelTag::Power);
        if has_power_model {
            let mut args = Kwargs::new().with("tag", "TXRADIO");
            let granted = ctx
                .invoke_sibling_by_tag(ModelTag::Power, "has_energy", &mut args)
                .map(|v| v.is_truthy())
                .unwrap_or(true);
            if !granted {
                self.drop_tx(ctx, &frame, DropReason::PowerDenied);
                return false;
            }
        }

        let candidates = match self.port.class {
            RadioClass::Isl => self.port.peers.clone(),
            _ => {
                let kinds = self
                    .target_kinds
                    .clone()
                    .unwrap_or_else(|| default_target_kinds(ctx.node_kind()));
                let mut args = Kwargs::new();
                args.insert("target_kinds", Value::Kinds(kinds));
                args.insert("at_time", now);
                match ctx.invoke_sibling_by_tag(ModelTag::ViewOfNode, "get_view", &mut args) {
                    Ok(Value::NodeIds(ids)) => ids,
                    Ok(_) | Err(_) => Vec::new(),
                }
            }
        };
        if candidates.is_empty() {
            self.drop_tx(ctx, &frame, DropReason::NoCompatibleRadio);
            return false;
        }

        let airtime = time_on_air(self.port.class, &self.port.phy, frame.size_bytes());
        if has_power_model {
            let mut args = Kwargs::new()
                .with("tag", "TXRADIO")
                .with("duration", airtime.as_secs_f64());
            let consumed = ctx
                .invoke_sibling_by_tag(ModelTag::Power, "consume_energy", &mut args)
                .map(|v| v.is_truthy())
                .unwrap_or(true);
            if !consumed {
                self.drop_tx(ctx, &frame, DropReason::PowerDenied);
                return false;
            }
        }

        ctx.logger().event(
            now,
            EventKind::PacketTx,
            json!({
                "radio_id": self.port.radio_id,
                "frame": frame.kind_label(),
                "size_bytes": frame.size_bytes(),
                "frequency_hz": self.port.phy.frequency_hz,
                "candidates": candidates,
            }),
        );
        metrics::counter!("orbsim_radio_tx_total").increment(1);

        ctx.emit_transmission(Transmission {
            source_node: ctx.node_id(),
            source_radio: self.port.radio_id,
            class: self.port.class,
            frequency_hz: self.port.phy.frequency_hz,
            phy: self.port.phy.clone(),
            frame,
            candidates,
            sent_at: now,
        });
        self.busy_until = now + airtime;
        self.sends_this_epoch += 1;
        true
    }

    fn set_phy_param(&mut self, param: &str, value: f64) -> Result<Value, InvocationError> {
        let phy = &mut self.port.phy;
        match param {
            "frequency_hz" => phy.frequency_hz = value,
            "bandwidth_hz" => phy.bandwidth_hz = value,
            "spreading_factor" => phy.spreading_factor = value as u8,
            "coding_rate" => phy.coding_rate = value as u8,
            "tx_power_dbw" => phy.tx_power_dbw = value,
            "symbol_rate_baud" => phy.symbol_rate_baud = value,
            "bits_allowed" => phy.bits_allowed = value as u64,
            _ => {
                return Err(InvocationError::InvalidArgument {
                    op: "set_phy_param",
                    key: "parameter",
                    expected: "a known phy parameter name",
                })
            }
        }
        Ok(Value::Null)
    }

    fn get_phy_param(&self, param: &str) -> Result<Value, InvocationError> {
        let phy = &self.port.phy;
        let value = match param {
            "frequency_hz" => phy.frequency_hz,
            "bandwidth_hz" => phy.bandwidth_hz,
            "spreading_factor" => phy.spreading_factor as f64,
            "coding_rate" => phy.coding_rate as f64,
            "tx_power_dbw" => phy.tx_power_dbw,
            "symbol_rate_baud" => phy.symbol_rate_baud,
            "bits_allowed" => phy.bits_allowed as f64,
            _ => {
                return Err(InvocationError::InvalidArgument {
                    op: "get_phy_param",
                    key: "parameter",
                    expected: "a known phy parameter name",
                })
            }
        };
        Ok(Value::Float(value))
    }

    /// The operation table shared by every radio class.
    pub fn invoke(
        &mut self,
        model: &'static str,
        op: &str,
        args: &mut Kwargs,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "add_packet_to_transmit" => {
                let frame = args.take_frame(op_name(op), "packet")?;
                Ok(Value::Bool(self.port.push_tx(frame).is_ok()))
            }
            "send_packet" => {
                let frame = match args.take("packet") {
                    Some(Value::Frame(f)) => f,
                    Some(_) => {
                        return Err(InvocationError::InvalidArgument {
                            op: "send_packet",
                            key: "packet",
                            expected: "mac frame",
                        })
                    }
                    None => match self.port.pop_tx() {
                        Some(f) => f,
                        None => return Ok(Value::Bool(false)),
                    },
                };
                Ok(Value::Bool(self.send_frame(frame, ctx)))
            }
            "get_received_packet" => Ok(match self.port.pop_rx() {
                Some(received) => Value::Frame(received.frame),
                None => Value::Null,
            }),
            "get_rx_queue_size" => Ok(Value::Int(self.port.rx_len() as i64)),
            "get_tx_queue_size" => Ok(Value::Int(self.port.tx_len() as i64)),
            "get_radio_id" => Ok(Value::Int(self.port.radio_id.0 as i64)),
            "set_frequency" => {
                let f = args.require_f64("set_frequency", "frequency")?;
                self.port.phy.frequency_hz = f;
                Ok(Value::Null)
            }
            "get_frequency" => Ok(Value::Float(self.port.phy.frequency_hz)),
            "set_phy_param" => {
                let param = args.require_str("set_phy_param", "parameter")?.to_string();
                let value = args.require_f64("set_phy_param", "value")?;
                self.set_phy_param(&param, value)
            }
            "get_phy_param" => {
                let param = args.require_str("get_phy_param", "parameter")?;
                self.get_phy_param(param)
            }
            "turn_rx_on" => {
                self.rx_user_enabled = true;
                Ok(Value::Null)
            }
            "turn_rx_off" => {
                self.rx_user_enabled = false;
                self.port.rx_enabled = false;
                Ok(Value::Null)
            }
            other => Err(InvocationError::UnknownOperation {
                model,
                op: other.to_string(),
            }),
        }
    }
}

/// `'static` op names for the argument-error paths.
fn op_name(op: &str) -> &'static str {
    match op {
        "add_packet_to_transmit" => "add_packet_to_transmit",
        "send_packet" => "send_packet",
        _ => "radio-op",
    }
}

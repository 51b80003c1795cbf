//! MAC state machines (tag `MAC`).
//!
//! Pure orchestrators over the radio and data-queue operation surfaces;
//! they own no physical state and are scheduled after their radio
//! dependencies each epoch. All retransmission lives here; the radio
//! substrate never retries.
//!
//! Four machines:
//! - [`ModelMacTtnc`]: satellite TT&C beacon/serve/ACK cycle.
//! - [`ModelMacGs`]: ground-station listen/request/receive/ACK cycle.
//! - [`ModelMacIot`]: device uplink with beacon-gated backoff and retry.
//! - [`ModelMacAggregator`]: satellite uplink sink, stores and ACKs.

use serde::Deserialize;
use serde_json::json;

use orbsim_common::{
    DataUnit, EventKind, InvocationError, Kwargs, MacFrame, Model, ModelContext, ModelTag, RadioId,
    SimTime, Value,
};
use rand::Rng;

/// Resolve the radio sibling: prefer an explicitly named class, fall back
/// to the first `BASICLORARADIO` model.
fn radio_op(
    ctx: &mut ModelContext<'_>,
    preferred_class: Option<&str>,
    op: &str,
    args: &mut Kwargs,
) -> Result<Value, InvocationError> {
    if let Some(class) = preferred_class {
        if ctx.has_sibling_with_class(class) {
            return ctx.invoke_sibling_by_class(class, op, args);
        }
    }
    ctx.invoke_sibling_by_tag(ModelTag::BasicLoraRadio, op, args)
}

fn radio_id(ctx: &mut ModelContext<'_>, preferred_class: Option<&str>) -> Option<RadioId> {
    let mut args = Kwargs::new();
    radio_op(ctx, preferred_class, "get_radio_id", &mut args)
        .ok()
        .and_then(|v| v.as_i64())
        .map(|id| RadioId(id as u32))
}

fn set_frequency(ctx: &mut ModelContext<'_>, preferred_class: Option<&str>, frequency_hz: f64) {
    let mut args = Kwargs::new().with("frequency", frequency_hz);
    let _ = radio_op(ctx, preferred_class, "set_frequency", &mut args);
}

fn send(ctx: &mut ModelContext<'_>, preferred_class: Option<&str>, frame: MacFrame) -> bool {
    let mut args = Kwargs::new().with("packet", frame);
    radio_op(ctx, preferred_class, "send_packet", &mut args)
        .map(|v| v.is_truthy())
        .unwrap_or(false)
}

/// Empty the radio's receive queue.
fn drain_received(ctx: &mut ModelContext<'_>, preferred_class: Option<&str>) -> Vec<MacFrame> {
    let mut frames = Vec::new();
    loop {
        let mut args = Kwargs::new();
        match radio_op(ctx, preferred_class, "get_received_packet", &mut args) {
            Ok(Value::Frame(frame)) => frames.push(frame),
            _ => break,
        }
    }
    frames
}

// ============================================================================
// TT&C satellite MAC
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TtncMacConfig {
    /// Seconds between beacons.
    pub beacon_interval: f64,
    /// Uniform extra wait in [0, backoff] added to each interval.
    pub beacon_backoff: f64,
    pub beacon_frequency: f64,
    pub downlink_frequency: f64,
    /// Radio class this MAC drives.
    #[serde(default = "default_downlink_radio")]
    pub radio_class: String,
}

fn default_downlink_radio() -> String {
    "ModelDownlinkRadio".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TtncState {
    Beaconing,
    AwaitingRequest,
    Serving,
    AwaitingAck,
}

/// Satellite TT&C MAC: beacon, serve a ground-station request from the
/// datastore without deleting, and delete only what the bulk ACK names.
pub struct ModelMacTtnc {
    cfg: TtncMacConfig,
    state: TtncState,
    next_beacon_at: SimTime,
    beacon_seq: u32,
    frame_seq: u32,
    /// Ground radio currently being served.
    gs_radio: Option<RadioId>,
    /// Frames still to transmit this cycle.
    to_send: Vec<MacFrame>,
    /// frame id -> data id, awaiting the bulk ACK.
    outstanding: Vec<(u64, u64)>,
}

impl ModelMacTtnc {
    pub fn new(cfg: TtncMacConfig) -> ModelMacTtnc {
        ModelMacTtnc {
            cfg,
            state: TtncState::Beaconing,
            next_beacon_at: SimTime::ZERO,
            beacon_seq: 0,
            frame_seq: 0,
            gs_radio: None,
            to_send: Vec::new(),
            outstanding: Vec::new(),
        }
    }

    fn schedule_next_beacon(&mut self, ctx: &mut ModelContext<'_>) {
        let backoff = if self.cfg.beacon_backoff > 0.0 {
            ctx.rng().gen_range(0.0..=self.cfg.beacon_backoff)
        } else {
            0.0
        };
        self.next_beacon_at = ctx.now() + SimTime::from_secs(self.cfg.beacon_interval + backoff);
    }

    fn send_beacon(&mut self, ctx: &mut ModelContext<'_>) {
        let preferred = self.cfg.radio_class.clone();
        let Some(own_radio) = radio_id(ctx, Some(&preferred)) else {
            return;
        };
        set_frequency(ctx, Some(&preferred), self.cfg.beacon_frequency);
        let beacon = MacFrame::Beacon {
            beacon_id: DataUnit::compose_id(ctx.node_id(), self.beacon_seq),
            source_radio: own_radio,
        };
        self.beacon_seq += 1;
        if send(ctx, Some(&preferred), beacon) {
            ctx.logger().event(
                ctx.now(),
                EventKind::BeaconSent,
                json!({ "beacon_seq": self.beacon_seq - 1 }),
            );
        }
        // Listen for requests and serve data on the downlink frequency.
        set_frequency(ctx, Some(&preferred), self.cfg.downlink_frequency);
        self.schedule_next_beacon(ctx);
    }

    /// Load up to `count` data frames from the datastore, without deleting.
    fn stage_from_datastore(&mut self, ctx: &mut ModelContext<'_>, count: u32, gs: RadioId) {
        let preferred = self.cfg.radio_class.clone();
        let Some(own_radio) = radio_id(ctx, Some(&preferred)) else {
            return;
        };
        let mut args = Kwargs::new().with("count", count as i64);
        let units = match ctx.invoke_sibling_by_tag(ModelTag::DataStore, "peek_data", &mut args) {
            Ok(Value::DataList(units)) => units,
            _ => Vec::new(),
        };
        self.to_send.clear();
        self.outstanding.clear();
        for unit in units {
            let frame_id = DataUnit::compose_id(ctx.node_id(), self.frame_seq);
            self.outstanding.push((frame_id, unit.id));
            self.to_send.push(MacFrame::Data {
                frame_id,
                source_radio: own_radio,
                dest_radio: Some(gs),
                sequence: self.frame_seq,
                payload: unit,
            });
            self.frame_seq += 1;
        }
    }

    fn apply_bulk_ack(&mut self, ctx: &mut ModelContext<'_>, acked: &[u64]) {
        let data_ids: Vec<u64> = self
            .outstanding
            .iter()
            .filter(|(frame_id, _)| acked.contains(frame_id))
            .map(|(_, data_id)| *data_id)
            .collect();
        if !data_ids.is_empty() {
            let mut args = Kwargs::new();
            args.insert("ids", Value::Ids(data_ids.clone()));
            let _ = ctx.invoke_sibling_by_tag(ModelTag::DataStore, "remove_data", &mut args);
        }
        self.outstanding
            .retain(|(frame_id, _)| !acked.contains(frame_id));
        log::debug!(
            "node {}: bulk ack cleared {} units, {} unacknowledged",
            ctx.node_id(),
            data_ids.len(),
            self.outstanding.len()
        );
    }
}

impl Model for ModelMacTtnc {
    fn class_name(&self) -> &'static str {
        "ModelMacTtnc"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Mac
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        let preferred = self.cfg.radio_class.clone();
        let own_radio = radio_id(ctx, Some(&preferred));
        let received = drain_received(ctx, Some(&preferred));

        let requests: Vec<(RadioId, u32)> = received
            .iter()
            .filter_map(|f| match f {
                MacFrame::Request {
                    source_radio,
                    dest_radio,
                    num_packets,
                    ..
                } if Some(*dest_radio) == own_radio => Some((*source_radio, *num_packets)),
                _ => None,
            })
            .collect();
        let acks: Vec<Vec<u64>> = received
            .iter()
            .filter_map(|f| match f {
                MacFrame::BulkAck {
                    dest_radio,
                    received_frame_ids,
                    ..
                } if Some(*dest_radio) == own_radio => Some(received_frame_ids.clone()),
                _ => None,
            })
            .collect();

        // ACKs clear the datastore whenever they arrive; a late ACK after a
        // timeout must not leave already-received units to be re-served.
        for ack in &acks {
            self.apply_bulk_ack(ctx, ack);
        }

        match self.state {
            TtncState::Beaconing => {
                if ctx.now() >= self.next_beacon_at {
                    self.send_beacon(ctx);
                    self.state = TtncState::AwaitingRequest;
                }
            }
            TtncState::AwaitingRequest => {
                if let Some(&(gs, wanted)) = requests.iter().max_by_key(|(_, n)| *n) {
                    self.gs_radio = Some(gs);
                    self.stage_from_datastore(ctx, wanted, gs);
                    self.state = TtncState::Serving;
                } else if ctx.now() >= self.next_beacon_at {
                    // No ground station answered: beacon again.
                    self.send_beacon(ctx);
                }
            }
            TtncState::Serving => {
                if let Some(frame) = self.to_send.first().cloned() {
                    if send(ctx, Some(&preferred), frame) {
                        self.to_send.remove(0);
                    }
                }
                if self.to_send.is_empty() {
                    self.state = TtncState::AwaitingAck;
                }
            }
            TtncState::AwaitingAck => {
                if !acks.is_empty() {
                    self.state = TtncState::Beaconing;
                } else if ctx.now() >= self.next_beacon_at {
                    // Unacknowledged frames stay in the datastore and will
                    // be re-served on the next request.
                    self.outstanding.clear();
                    self.state = TtncState::Beaconing;
                }
            }
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        _args: &mut Kwargs,
        _ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "get_state" => Ok(Value::Str(format!("{:?}", self.state))),
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Ground-station MAC
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GsMacConfig {
    /// How many data frames to request per cycle.
    pub num_packets: u32,
    /// Seconds without a receipt before giving up on the satellite.
    pub timeout: f64,
    pub beacon_frequency: f64,
    pub downlink_frequency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GsState {
    Listening,
    Requesting,
    Receiving,
    Acking,
}

/// Ground-station MAC: answer a beacon with a request, accumulate the
/// downlink, bulk-ACK what arrived, store payloads in the datastore.
pub struct ModelMacGs {
    cfg: GsMacConfig,
    state: GsState,
    sat_radio: Option<RadioId>,
    sequence: u32,
    received_frame_ids: Vec<u64>,
    last_receipt_at: SimTime,
}

impl ModelMacGs {
    pub fn new(cfg: GsMacConfig) -> ModelMacGs {
        ModelMacGs {
            cfg,
            state: GsState::Listening,
            sat_radio: None,
            sequence: 0,
            received_frame_ids: Vec::new(),
            last_receipt_at: SimTime::ZERO,
        }
    }
}

impl Model for ModelMacGs {
    fn class_name(&self) -> &'static str {
        "ModelMacGs"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Mac
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        let own_radio = radio_id(ctx, None);
        let received = drain_received(ctx, None);

        // Store any data frames regardless of state; the protocol cycle
        // only controls requesting and acknowledging.
        for frame in &received {
            if let MacFrame::Data {
                frame_id, payload, ..
            } = frame
            {
                let mut args = Kwargs::new().with("data", payload.clone());
                let stored = ctx
                    .invoke_sibling_by_tag(ModelTag::DataStore, "add_data", &mut args)
                    .map(|v| v.is_truthy())
                    .unwrap_or(false);
                if stored && !self.received_frame_ids.contains(frame_id) {
                    self.received_frame_ids.push(*frame_id);
                }
                self.last_receipt_at = ctx.now();
            }
        }

        match self.state {
            GsState::Listening => {
                set_frequency(ctx, None, self.cfg.beacon_frequency);
                if let Some(MacFrame::Beacon { source_radio, .. }) = received
                    .iter()
                    .find(|f| matches!(f, MacFrame::Beacon { .. }))
                {
                    self.sat_radio = Some(*source_radio);
                    self.state = GsState::Requesting;
                }
            }
            GsState::Requesting => {
                let Some(sat) = self.sat_radio else {
                    self.state = GsState::Listening;
                    return;
                };
                let Some(own) = own_radio else { return };
                set_frequency(ctx, None, self.cfg.downlink_frequency);
                let request = MacFrame::Request {
                    source_radio: own,
                    dest_radio: sat,
                    num_packets: self.cfg.num_packets,
                    sequence: self.sequence,
                };
                self.sequence += 1;
                if send(ctx, None, request) {
                    self.received_frame_ids.clear();
                    self.last_receipt_at = ctx.now();
                    self.state = GsState::Receiving;
                }
            }
            GsState::Receiving => {
                let complete = self.received_frame_ids.len() as u32 >= self.cfg.num_packets;
                let timed_out =
                    ctx.now().seconds_since(self.last_receipt_at) > self.cfg.timeout;
                if complete || timed_out {
                    if self.received_frame_ids.is_empty() {
                        // Satellite went silent: back to the beacon channel.
                        set_frequency(ctx, None, self.cfg.beacon_frequency);
                        self.state = GsState::Listening;
                    } else {
                        self.state = GsState::Acking;
                    }
                }
            }
            GsState::Acking => {
                let (Some(sat), Some(own)) = (self.sat_radio, own_radio) else {
                    self.state = GsState::Listening;
                    return;
                };
                let ack = MacFrame::BulkAck {
                    source_radio: own,
                    dest_radio: sat,
                    received_frame_ids: self.received_frame_ids.clone(),
                };
                if send(ctx, None, ack) {
                    self.received_frame_ids.clear();
                    set_frequency(ctx, None, self.cfg.beacon_frequency);
                    self.state = GsState::Listening;
                }
            }
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        _args: &mut Kwargs,
        _ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "get_state" => Ok(Value::Str(format!("{:?}", self.state))),
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// IoT device MAC
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct IotMacConfig {
    /// Maximum uniform backoff (s) after hearing a beacon.
    pub backoff: f64,
    /// Seconds to wait for an ACK before retrying on the next beacon.
    pub retransmit: f64,
    pub beacon_frequency: f64,
    pub uplink_frequency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IotState {
    Idle,
    WaitingBeacon,
    Backoff,
    Transmitting,
    AwaitingAck,
}

/// Device MAC: wait for a fresh beacon, back off, transmit the generator
/// head on the uplink, retry on successive beacon cycles until ACKed.
pub struct ModelMacIot {
    cfg: IotMacConfig,
    state: IotState,
    current: Option<MacFrame>,
    frame_seq: u32,
    /// Last beacon acted upon, so a re-heard beacon is not double-counted.
    last_beacon_id: Option<u64>,
    backoff_until: SimTime,
    retransmit_at: SimTime,
}

impl ModelMacIot {
    pub fn new(cfg: IotMacConfig) -> ModelMacIot {
        ModelMacIot {
            cfg,
            state: IotState::Idle,
            current: None,
            frame_seq: 0,
            last_beacon_id: None,
            backoff_until: SimTime::ZERO,
            retransmit_at: SimTime::ZERO,
        }
    }

    fn current_frame_id(&self) -> Option<u64> {
        match &self.current {
            Some(MacFrame::Data { frame_id, .. }) => Some(*frame_id),
            _ => None,
        }
    }

    /// A beacon not seen before, if any.
    fn fresh_beacon(&self, received: &[MacFrame]) -> Option<u64> {
        received.iter().find_map(|f| match f {
            MacFrame::Beacon { beacon_id, .. } if Some(*beacon_id) != self.last_beacon_id => {
                Some(*beacon_id)
            }
            _ => None,
        })
    }
}

impl Model for ModelMacIot {
    fn class_name(&self) -> &'static str {
        "ModelMacIot"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Mac
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        let own_radio = radio_id(ctx, None);
        let received = drain_received(ctx, None);

        // ACK handling first: it refers to the previous epoch's transmit.
        if self.state == IotState::AwaitingAck {
            let acked = self.current_frame_id().map(|id| {
                received.iter().any(
                    |f| matches!(f, MacFrame::Ack { acked_frame_id, .. } if *acked_frame_id == id),
                )
            });
            if acked == Some(true) {
                self.current = None;
                self.state = IotState::Idle;
            } else if ctx.now() >= self.retransmit_at {
                log::debug!("node {}: ack timeout, rejoining beacon cycle", ctx.node_id());
                set_frequency(ctx, None, self.cfg.beacon_frequency);
                self.state = IotState::WaitingBeacon;
            } else {
                return;
            }
        }

        if self.state == IotState::Idle {
            let mut args = Kwargs::new();
            let unit = match ctx.invoke_sibling_by_tag(ModelTag::DataGenerator, "get_data", &mut args)
            {
                Ok(Value::Data(unit)) => Some(unit),
                _ => None,
            };
            let (Some(unit), Some(own)) = (unit, own_radio) else {
                return;
            };
            self.current = Some(MacFrame::Data {
                frame_id: DataUnit::compose_id(ctx.node_id(), self.frame_seq),
                source_radio: own,
                dest_radio: None,
                sequence: self.frame_seq,
                payload: unit,
            });
            self.frame_seq += 1;
            set_frequency(ctx, None, self.cfg.beacon_frequency);
            self.state = IotState::WaitingBeacon;
        }

        if self.state == IotState::WaitingBeacon {
            let Some(beacon_id) = self.fresh_beacon(&received) else {
                return;
            };
            self.last_beacon_id = Some(beacon_id);
            let wait = if self.cfg.backoff > 0.0 {
                ctx.rng().gen_range(0.0..=self.cfg.backoff)
            } else {
                0.0
            };
            self.backoff_until = ctx.now() + SimTime::from_secs(wait);
            set_frequency(ctx, None, self.cfg.uplink_frequency);
            self.state = IotState::Backoff;
        }

        if self.state == IotState::Backoff && ctx.now() >= self.backoff_until {
            self.state = IotState::Transmitting;
        }

        if self.state == IotState::Transmitting {
            let Some(frame) = self.current.clone() else {
                self.state = IotState::Idle;
                return;
            };
            if send(ctx, None, frame) {
                self.retransmit_at = ctx.now() + SimTime::from_secs(self.cfg.retransmit);
                self.state = IotState::AwaitingAck;
            } else {
                // Satellite likely out of view: wait for the next beacon.
                set_frequency(ctx, None, self.cfg.beacon_frequency);
                self.state = IotState::WaitingBeacon;
            }
        }
    }

    fn invoke(
        &mut self,
        op: &str,
        _args: &mut Kwargs,
        _ctx: &mut ModelContext<'_>,
    ) -> Result<Value, InvocationError> {
        match op {
            "get_state" => Ok(Value::Str(format!("{:?}", self.state))),
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Aggregator satellite MAC
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MacAggregatorConfig {
    /// Radio class this MAC drives.
    pub radio_class: Option<String>,
}

/// Satellite uplink sink: stores received data units into the datastore and
/// acknowledges each frame back to its source.
pub struct ModelMacAggregator {
    cfg: MacAggregatorConfig,
    /// Frame ids already stored, so retransmissions only re-ACK.
    seen_frame_ids: Vec<u64>,
}

impl ModelMacAggregator {
    pub fn new(cfg: MacAggregatorConfig) -> ModelMacAggregator {
        ModelMacAggregator {
            cfg,
            seen_frame_ids: Vec::new(),
        }
    }

    fn preferred(&self) -> Option<&str> {
        self.cfg
            .radio_class
            .as_deref()
            .or(Some("ModelAggregatorRadio"))
    }
}

impl Model for ModelMacAggregator {
    fn class_name(&self) -> &'static str {
        "ModelMacAggregator"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Mac
    }

    fn advance(&mut self, ctx: &mut ModelContext<'_>) {
        let preferred = self.preferred().map(str::to_string);
        let own_radio = radio_id(ctx, preferred.as_deref());
        let received = drain_received(ctx, preferred.as_deref());
        let Some(own) = own_radio else { return };

        for frame in received {
            let MacFrame::Data {
                frame_id,
                source_radio,
                payload,
                ..
            } = frame
            else {
                continue;
            };
            if !self.seen_frame_ids.contains(&frame_id) {
                let mut args = Kwargs::new().with("data", payload);
                let stored = ctx
                    .invoke_sibling_by_tag(ModelTag::DataStore, "add_data", &mut args)
                    .map(|v| v.is_truthy())
                    .unwrap_or(false);
                if !stored {
                    // Store full: no ACK, the device will retry.
                    continue;
                }
                self.seen_frame_ids.push(frame_id);
            }
            let ack = MacFrame::Ack {
                source_radio: own,
                dest_radio: source_radio,
                acked_frame_id: frame_id,
            };
            let mut args = Kwargs::new().with("packet", ack);
            let _ = radio_op(
                ctx,
                preferred.as_deref(),
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
        match op {
            "get_seen_count" => Ok(Value::Int(self.seen_frame_ids.len() as i64)),
            other => Err(InvocationError::UnknownOperation {
                model: self.class_name(),
                op: other.to_string(),
            }),
        }
    }
}
